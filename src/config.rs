use crate::models::ForestSettings;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Directory holding the flat-file store.
    pub data_dir: PathBuf,
    pub train_file: PathBuf,
    pub labels_file: PathBuf,
    /// Where the trained model artifact is persisted.
    pub model_path: PathBuf,
    pub forest: ForestSettings,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let data_dir = PathBuf::from(
            std::env::var("DATA_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "app/data".to_string()),
        );

        let file_in_data_dir = |var: &str, default: &str| -> anyhow::Result<PathBuf> {
            let name = std::env::var(var).unwrap_or_else(|_| default.to_string());
            if name.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", var);
            }
            Ok(data_dir.join(name))
        };

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            train_file: file_in_data_dir("TRAIN_FILE", "train.csv")?,
            labels_file: file_in_data_dir("LABELS_FILE", "labels.csv")?,
            model_path: match std::env::var("MODEL_PATH") {
                Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
                _ => data_dir.join("model.json"),
            },
            forest: ForestSettings {
                n_estimators: std::env::var("N_ESTIMATORS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("N_ESTIMATORS must be a positive number"))
                    .and_then(|n: usize| {
                        if n == 0 {
                            anyhow::bail!("N_ESTIMATORS must be at least 1");
                        }
                        Ok(n)
                    })?,
                random_state: std::env::var("RANDOM_STATE")
                    .unwrap_or_else(|_| "150".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("RANDOM_STATE must be a non-negative number"))?,
                max_depth: std::env::var("MAX_DEPTH")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| s.parse::<usize>())
                    .transpose()
                    .map_err(|_| anyhow::anyhow!("MAX_DEPTH must be a positive number"))?,
            },
            rate_limit_per_second: std::env::var("RATE_LIMIT_PER_SECOND")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_PER_SECOND must be a number"))?,
            rate_limit_burst: std::env::var("RATE_LIMIT_BURST")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_BURST must be a number"))?,
            data_dir,
        };

        tracing::debug!("Train file: {}", config.train_file.display());
        tracing::debug!("Labels file: {}", config.labels_file.display());
        tracing::debug!("Model artifact: {}", config.model_path.display());
        tracing::debug!(
            "Forest: {} trees, seed {}, max depth {:?}",
            config.forest.n_estimators,
            config.forest.random_state,
            config.forest.max_depth
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
