//! Lifecycle of the model serving predictions.
//!
//! The first request that needs a model either reuses the persisted artifact
//! (when it was trained on the current store contents with the current
//! settings) or trains a new one. Concurrent first requests wait on the
//! training lock and then reuse the model the winner installed.

use crate::artifact::{ModelArtifact, TrainedModel};
use crate::errors::{AppError, ResultExt};
use crate::forest::{MedianImputer, RandomForest};
use crate::models::{ApplicantFeatures, ApplicantRecord, ForestSettings, ModelInfo, FEATURE_NAMES};
use crate::store::ApplicantStore;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct ModelRegistry {
    store: Arc<ApplicantStore>,
    settings: ForestSettings,
    artifact_path: PathBuf,
    current: RwLock<Option<Arc<TrainedModel>>>,
    training: Mutex<()>,
    training_runs: AtomicUsize,
}

impl ModelRegistry {
    pub fn new(
        store: Arc<ApplicantStore>,
        settings: ForestSettings,
        artifact_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            settings,
            artifact_path: artifact_path.into(),
            current: RwLock::new(None),
            training: Mutex::new(()),
            training_runs: AtomicUsize::new(0),
        }
    }

    /// The serving model, loading or training it on first use.
    pub async fn current(&self) -> Result<Arc<TrainedModel>, AppError> {
        if let Some(model) = self.current.read().await.as_ref() {
            return Ok(Arc::clone(model));
        }

        let _guard = self.training.lock().await;
        if let Some(model) = self.current.read().await.as_ref() {
            return Ok(Arc::clone(model));
        }

        let model = Arc::new(self.load_or_train().await?);
        *self.current.write().await = Some(Arc::clone(&model));
        Ok(model)
    }

    /// The serving model if one is already loaded.
    pub async fn loaded(&self) -> Option<Arc<TrainedModel>> {
        self.current.read().await.clone()
    }

    /// Trains a fresh model on the current store and swaps it in.
    pub async fn retrain(&self) -> Result<Arc<TrainedModel>, AppError> {
        let _guard = self.training.lock().await;

        let previous = match self.loaded().await {
            Some(model) => Some(model.info.version),
            None => ModelArtifact::load(&self.artifact_path)
                .await?
                .map(|m| m.info.version),
        };

        let model = Arc::new(self.train(previous.map_or(1, |v| v + 1)).await?);
        *self.current.write().await = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Probability of default for one applicant.
    pub async fn score(&self, features: &ApplicantFeatures) -> Result<f64, AppError> {
        let model = self.current().await?;
        let mut row = features.to_vector();
        model.imputer.transform_row(&mut row);
        let [_, p_default] = model.forest.predict_proba(&row)?;
        Ok(p_default)
    }

    /// Number of training runs since start-up.
    pub fn training_runs(&self) -> usize {
        self.training_runs.load(Ordering::SeqCst)
    }

    async fn load_or_train(&self) -> Result<TrainedModel, AppError> {
        let fingerprint = self.store.fingerprint().await?;
        let persisted = ModelArtifact::load(&self.artifact_path).await?;

        let next_version = match persisted {
            Some(model)
                if model.info.store_fingerprint == fingerprint
                    && model.info.settings == self.settings =>
            {
                tracing::info!(
                    "Loaded model v{} from {}",
                    model.info.version,
                    self.artifact_path.display()
                );
                return Ok(model);
            }
            Some(model) => {
                tracing::info!(
                    "Persisted model v{} is stale, retraining",
                    model.info.version
                );
                model.info.version + 1
            }
            None => 1,
        };

        self.train(next_version).await
    }

    async fn train(&self, version: u64) -> Result<TrainedModel, AppError> {
        let (records, fingerprint) = self.store.snapshot().await?;
        let settings = self.settings.clone();
        tracing::info!(
            "Training model v{} on {} records ({} trees, seed {})",
            version,
            records.len(),
            settings.n_estimators,
            settings.random_state
        );

        let started = std::time::Instant::now();
        let model = tokio::task::spawn_blocking(move || {
            train_model(&records, &settings, fingerprint, version)
        })
        .await
        .map_err(|e| AppError::InternalError(format!("training task failed: {}", e)))?
        .context("training model")?;
        self.training_runs.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            "Model v{} trained in {:?} on {} labelled records",
            version,
            started.elapsed(),
            model.info.training_records
        );

        match ModelArtifact::new(&model) {
            Ok(artifact) => {
                if let Err(e) = artifact.save(&self.artifact_path).await {
                    tracing::error!(
                        "Failed to persist model to {}: {}",
                        self.artifact_path.display(),
                        e
                    );
                }
            }
            Err(e) => tracing::error!("Failed to serialize model: {}", e),
        }

        Ok(model)
    }
}

/// Fits the imputer and forest on every labelled record.
pub fn train_model(
    records: &[ApplicantRecord],
    settings: &ForestSettings,
    store_fingerprint: String,
    version: u64,
) -> Result<TrainedModel, AppError> {
    let (mut x, y): (Vec<Vec<f64>>, Vec<u8>) = records
        .iter()
        .filter_map(|r| r.target.map(|t| (r.features.to_vector().to_vec(), t)))
        .unzip();

    if x.is_empty() {
        return Err(AppError::StorageError(
            "the store holds no labelled records".to_string(),
        ));
    }

    let imputer = MedianImputer::fit(&x, FEATURE_NAMES.len());
    x.iter_mut().for_each(|row| imputer.transform_row(row));
    let forest = RandomForest::fit(&x, &y, settings)?;

    Ok(TrainedModel {
        info: ModelInfo {
            version,
            store_fingerprint,
            trained_at: Utc::now(),
            training_records: x.len(),
            settings: settings.clone(),
        },
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        imputer,
        forest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, ext_source: f64, target: Option<u8>) -> ApplicantRecord {
        ApplicantRecord {
            sk_id_curr: id,
            features: ApplicantFeatures::from_vector([
                0.0, 1.0, 0.0, 1.0, 1.0, 1.0, ext_source, -7018.0, 1.0, 19.2, 1.0, 1.0,
            ]),
            target,
        }
    }

    #[test]
    fn train_model_uses_only_labelled_records() {
        let records = vec![
            record(1, 0.1, Some(1)),
            record(2, 0.9, Some(0)),
            record(3, f64::NAN, Some(0)),
            record(4, 0.5, None),
        ];
        let model = train_model(&records, &ForestSettings::default(), "fp".into(), 3).unwrap();

        assert_eq!(model.info.training_records, 3);
        assert_eq!(model.info.version, 3);
        assert_eq!(model.imputer.medians[6], 0.5);
        assert_eq!(model.feature_names.len(), 12);
    }

    #[test]
    fn train_model_requires_labels() {
        let records = vec![record(1, 0.1, None)];
        assert!(train_model(&records, &ForestSettings::default(), "fp".into(), 1).is_err());
    }
}
