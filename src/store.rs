use crate::errors::{AppError, ResultExt};
use crate::models::{
    ApplicantFeatures, ApplicantRecord, FEATURE_COUNT, FEATURE_NAMES, ID_COLUMN, TARGET_COLUMN,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only flat-file store of historical applications.
///
/// Feature rows live in one CSV file and labels in another, aligned by row.
/// Columns are matched by header name; extra columns are ignored.
pub struct ApplicantStore {
    train_path: PathBuf,
    labels_path: PathBuf,
    /// Serialises appends so the two files never interleave rows.
    append_lock: Mutex<()>,
}

impl ApplicantStore {
    pub fn new(train_path: impl Into<PathBuf>, labels_path: impl Into<PathBuf>) -> Self {
        Self {
            train_path: train_path.into(),
            labels_path: labels_path.into(),
            append_lock: Mutex::new(()),
        }
    }

    /// Reads every record, joined with its label.
    pub async fn load(&self) -> Result<Vec<ApplicantRecord>, AppError> {
        let (train, labels) = self.read_files().await?;
        parse_store(&train, &labels)
    }

    /// Returns the last record stored under `id`.
    pub async fn find(&self, id: i64) -> Result<ApplicantRecord, AppError> {
        self.load()
            .await?
            .into_iter()
            .rev()
            .find(|record| record.sk_id_curr == id)
            .ok_or_else(|| AppError::NotFound(format!("Customer {} not found", id)))
    }

    /// Appends a labelled record; identifiers already in the store are rejected.
    pub async fn append(&self, record: &ApplicantRecord) -> Result<(), AppError> {
        let target = record.target.ok_or_else(|| {
            AppError::BadRequest("a decision must carry a TARGET label".to_string())
        })?;

        let _guard = self.append_lock.lock().await;

        let train_exists = tokio::fs::try_exists(&self.train_path).await?;
        let labels_exists = tokio::fs::try_exists(&self.labels_path).await?;
        if train_exists != labels_exists {
            return Err(AppError::StorageError(
                "feature and label files must exist together".to_string(),
            ));
        }

        let mut feature_row = Vec::new();
        let mut label_row = Vec::new();

        let columns = if train_exists {
            let train = tokio::fs::read_to_string(&self.train_path).await?;
            let labels = tokio::fs::read_to_string(&self.labels_path).await?;
            if !train.is_empty() && !train.ends_with('\n') {
                feature_row.push(b'\n');
            }
            if !labels.is_empty() && !labels.ends_with('\n') {
                label_row.push(b'\n');
            }
            let existing = parse_store(&train, &labels)?;
            if existing.iter().any(|r| r.sk_id_curr == record.sk_id_curr) {
                return Err(AppError::Conflict(format!(
                    "Customer {} already exists",
                    record.sk_id_curr
                )));
            }
            Some(csv::Reader::from_reader(train.as_bytes()).headers()?.clone())
        } else {
            None
        };

        feature_row.extend(encode_feature_row(record, columns.as_ref())?);
        label_row.extend(encode_label_row(target, !labels_exists));

        write_rows(&self.train_path, &feature_row, &self.labels_path, &label_row).await?;

        tracing::info!(
            "Appended customer {} with TARGET={} to {}",
            record.sk_id_curr,
            target,
            self.train_path.display()
        );
        Ok(())
    }

    /// Reads the records and the fingerprint of the exact bytes they came from.
    pub async fn snapshot(&self) -> Result<(Vec<ApplicantRecord>, String), AppError> {
        let (train, labels) = self.read_files().await?;
        let records = parse_store(&train, &labels)?;
        Ok((records, fingerprint_of(train.as_bytes(), labels.as_bytes())))
    }

    /// SHA-256 over both files, identifying the data a model was trained on.
    pub async fn fingerprint(&self) -> Result<String, AppError> {
        let (train, labels) = self.read_files().await?;
        Ok(fingerprint_of(train.as_bytes(), labels.as_bytes()))
    }

    /// Reads both files under the append lock so they are never seen mid-append.
    async fn read_files(&self) -> Result<(String, String), AppError> {
        let _guard = self.append_lock.lock().await;
        let train = tokio::fs::read_to_string(&self.train_path)
            .await
            .with_context(|| format!("reading {}", self.train_path.display()))?;
        let labels = tokio::fs::read_to_string(&self.labels_path)
            .await
            .with_context(|| format!("reading {}", self.labels_path.display()))?;
        Ok((train, labels))
    }
}

fn fingerprint_of(train: &[u8], labels: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((train.len() as u64).to_le_bytes());
    hasher.update(train);
    hasher.update(labels);
    hex::encode(hasher.finalize())
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

/// Appends the feature row, then the label row. When the label write fails
/// the feature file is restored to its previous length (or removed if this
/// append created it), keeping both files row-aligned.
async fn write_rows(
    train_path: &Path,
    feature_row: &[u8],
    labels_path: &Path,
    label_row: &[u8],
) -> Result<(), AppError> {
    let previous_len = match tokio::fs::metadata(train_path).await {
        Ok(metadata) => Some(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    append_bytes(train_path, feature_row).await?;

    if let Err(e) = append_bytes(labels_path, label_row).await {
        let rollback = match previous_len {
            Some(len) => match tokio::fs::OpenOptions::new().write(true).open(train_path).await {
                Ok(file) => file.set_len(len).await,
                Err(open_err) => Err(open_err),
            },
            None => tokio::fs::remove_file(train_path).await,
        };
        if let Err(rollback_err) = rollback {
            tracing::error!(
                "Failed to roll back {} after label write error: {}",
                train_path.display(),
                rollback_err
            );
        }
        return Err(e);
    }

    Ok(())
}

/// Encodes one row following the file's existing column order.
/// Without an existing header, the canonical header is written first.
fn encode_feature_row(
    record: &ApplicantRecord,
    columns: Option<&csv::StringRecord>,
) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    let canonical: Vec<&str> = std::iter::once(ID_COLUMN).chain(FEATURE_NAMES).collect();
    let columns: Vec<&str> = match columns {
        Some(header) => header.iter().map(str::trim).collect(),
        None => {
            writer.write_record(&canonical)?;
            canonical
        }
    };

    let values = record.features.to_vector();
    let row: Vec<String> = columns
        .iter()
        .map(|name| {
            if *name == ID_COLUMN {
                record.sk_id_curr.to_string()
            } else {
                FEATURE_NAMES
                    .iter()
                    .position(|f| f == name)
                    .map(|i| values[i].to_string())
                    .unwrap_or_default()
            }
        })
        .collect();
    writer.write_record(&row)?;

    writer
        .into_inner()
        .map_err(|e| AppError::StorageError(e.to_string()))
}

fn encode_label_row(target: u8, with_header: bool) -> Vec<u8> {
    let mut out = String::new();
    if with_header {
        out.push_str(TARGET_COLUMN);
        out.push('\n');
    }
    out.push_str(&target.to_string());
    out.push('\n');
    out.into_bytes()
}

/// Parses the feature and label CSV contents into joined records.
pub fn parse_store(train: &str, labels: &str) -> Result<Vec<ApplicantRecord>, AppError> {
    let mut reader = csv::Reader::from_reader(train.as_bytes());
    let headers = reader.headers()?.clone();

    let column = |name: &str| -> Result<usize, AppError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| AppError::StorageError(format!("missing column {}", name)))
    };

    let id_index = column(ID_COLUMN)?;
    let mut feature_indices = [0usize; FEATURE_COUNT];
    for (slot, name) in feature_indices.iter_mut().zip(FEATURE_NAMES) {
        *slot = column(name)?;
    }

    let targets = parse_labels(labels)?;
    let mut records = Vec::new();

    for (row_number, row) in reader.records().enumerate() {
        let row = row?;
        let line = row_number + 2;

        let id_cell = row.get(id_index).unwrap_or("").trim();
        let sk_id_curr = parse_cell(id_cell)
            .filter(|v| v.fract() == 0.0)
            .map(|v| v as i64)
            .ok_or_else(|| {
                AppError::StorageError(format!("line {}: invalid {} {:?}", line, ID_COLUMN, id_cell))
            })?;

        let mut values = [f64::NAN; FEATURE_COUNT];
        for (value, &index) in values.iter_mut().zip(&feature_indices) {
            let cell = row.get(index).unwrap_or("").trim();
            if cell.is_empty() {
                continue;
            }
            *value = parse_cell(cell).ok_or_else(|| {
                AppError::StorageError(format!(
                    "line {}: invalid value {:?} in {}",
                    line, cell, headers[index].trim()
                ))
            })?;
        }

        records.push(ApplicantRecord {
            sk_id_curr,
            features: ApplicantFeatures::from_vector(values),
            target: None,
        });
    }

    if records.len() != targets.len() {
        return Err(AppError::StorageError(format!(
            "{} feature rows but {} labels",
            records.len(),
            targets.len()
        )));
    }

    for (record, target) in records.iter_mut().zip(targets) {
        record.target = target;
    }

    Ok(records)
}

fn parse_labels(labels: &str) -> Result<Vec<Option<u8>>, AppError> {
    let mut reader = csv::Reader::from_reader(labels.as_bytes());
    let index = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == TARGET_COLUMN)
        .ok_or_else(|| AppError::StorageError(format!("missing column {}", TARGET_COLUMN)))?;

    let mut targets = Vec::new();
    for (row_number, row) in reader.records().enumerate() {
        let row = row?;
        let cell = row.get(index).unwrap_or("").trim();
        if cell.is_empty() {
            targets.push(None);
            continue;
        }
        let target = parse_cell(cell)
            .filter(|v| *v == 0.0 || *v == 1.0)
            .map(|v| v as u8)
            .ok_or_else(|| {
                AppError::StorageError(format!(
                    "labels line {}: invalid TARGET {:?}",
                    row_number + 2,
                    cell
                ))
            })?;
        targets.push(Some(target));
    }

    Ok(targets)
}

/// Numeric cell, accepting the Y/N and True/False spellings of flags.
fn parse_cell(cell: &str) -> Option<f64> {
    match cell {
        "Y" | "y" | "True" | "true" => Some(1.0),
        "N" | "n" | "False" | "false" => Some(0.0),
        _ => cell.parse::<f64>().ok(),
    }
}
