use crate::errors::AppError;
use crate::forest::{MedianImputer, RandomForest};
use crate::models::ModelInfo;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// A trained model together with everything needed to serve it.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedModel {
    pub info: ModelInfo,
    pub feature_names: Vec<String>,
    pub imputer: MedianImputer,
    pub forest: RandomForest,
}

/// Persisted model with an integrity checksum.
///
/// Guards against serving a truncated or hand-edited model file:
/// 1. The checksum is computed over the serialized model when saving
/// 2. It is recomputed when loading
/// 3. A mismatch makes the artifact unusable and forces retraining
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// The serialized model (JSON string).
    pub data: String,
    /// SHA-256 checksum of the data (hex encoded).
    pub checksum: String,
}

impl ModelArtifact {
    pub fn new(model: &TrainedModel) -> Result<Self, AppError> {
        let data = serde_json::to_string(model)
            .map_err(|e| AppError::InternalError(format!("serializing model: {}", e)))?;
        let checksum = Self::compute_checksum(&data);
        Ok(Self { data, checksum })
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    /// Returns the model when the checksum matches, `None` otherwise.
    pub fn into_model(self) -> Option<TrainedModel> {
        if !self.is_valid() {
            tracing::warn!(
                "Model artifact checksum mismatch (expected: {}, computed: {})",
                self.checksum,
                Self::compute_checksum(&self.data)
            );
            return None;
        }
        serde_json::from_str(&self.data).ok()
    }

    /// Writes the artifact next to its final location, then renames it in place.
    pub async fn save(&self, path: &Path) -> Result<(), AppError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AppError::InternalError(format!("serializing artifact: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Loads a usable model from `path`.
    ///
    /// A missing, unparsable or tampered file yields `Ok(None)`.
    pub async fn load(path: &Path) -> Result<Option<TrainedModel>, AppError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<ModelArtifact>(&raw) {
            Ok(artifact) => Ok(artifact.into_model()),
            Err(e) => {
                tracing::warn!("Ignoring unreadable model artifact {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}
