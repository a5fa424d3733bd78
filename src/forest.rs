//! Random forest classifier for binary labels, built on smartcore.
//!
//! smartcore's forest only exposes majority-vote predictions, so the ensemble
//! is kept as one single-tree smartcore forest per member: each member draws
//! its own bootstrap sample and `sqrt(n_features)` split candidates, seeded
//! from the forest seed. The probability of a class is the share of members
//! voting for it. Importances are permutation importances, which smartcore
//! does not compute.

use crate::errors::AppError;
use crate::models::ForestSettings;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_classifier::{
    RandomForestClassifier, RandomForestClassifierParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fmt;

/// Rows used to estimate permutation importances.
const IMPORTANCE_SAMPLE: usize = 5_000;

type Member = RandomForestClassifier<f64, i32, DenseMatrix<f64>, Vec<i32>>;

/// Replaces missing values with per-column medians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedianImputer {
    pub medians: Vec<f64>,
}

impl MedianImputer {
    /// Learns the median of every column, ignoring NaN cells.
    /// A column without any value falls back to zero.
    pub fn fit(rows: &[Vec<f64>], n_features: usize) -> Self {
        let medians = (0..n_features)
            .map(|col| {
                let mut values: Vec<f64> = rows
                    .iter()
                    .map(|row| row[col])
                    .filter(|v| !v.is_nan())
                    .collect();
                median(&mut values).unwrap_or(0.0)
            })
            .collect();

        Self { medians }
    }

    pub fn transform_row(&self, row: &mut [f64]) {
        for (value, median) in row.iter_mut().zip(&self.medians) {
            if value.is_nan() {
                *value = *median;
            }
        }
    }
}

/// Median of the values; sorts them in place.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Ensemble of bootstrap-trained decision trees.
#[derive(Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    members: Vec<Member>,
    importances: Vec<f64>,
}

impl fmt::Debug for RandomForest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomForest")
            .field("n_features", &self.n_features)
            .field("members", &self.members.len())
            .field("importances", &self.importances)
            .finish()
    }
}

impl RandomForest {
    /// Fits the forest on complete rows (no NaN) and 0/1 labels.
    pub fn fit(x: &[Vec<f64>], y: &[u8], settings: &ForestSettings) -> Result<Self, AppError> {
        if x.is_empty() {
            return Err(AppError::InternalError(
                "cannot train on an empty dataset".to_string(),
            ));
        }
        if x.len() != y.len() {
            return Err(AppError::InternalError(format!(
                "{} feature rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        if settings.n_estimators == 0 {
            return Err(AppError::InternalError(
                "n_estimators must be at least 1".to_string(),
            ));
        }

        let n_features = x[0].len();
        if x.iter().any(|row| row.len() != n_features) {
            return Err(AppError::InternalError(
                "feature rows have different widths".to_string(),
            ));
        }
        if x.iter().flatten().any(|v| !v.is_finite()) {
            return Err(AppError::InternalError(
                "training rows must be imputed before fitting".to_string(),
            ));
        }
        if let Some(label) = y.iter().find(|&&label| label > 1) {
            return Err(AppError::InternalError(format!(
                "label {} is not binary",
                label
            )));
        }
        let max_depth = settings
            .max_depth
            .map(u16::try_from)
            .transpose()
            .map_err(|_| AppError::InternalError("max_depth must be at most 65535".to_string()))?;

        let matrix = DenseMatrix::from_2d_vec(&x.to_vec());
        let labels: Vec<i32> = y.iter().map(|&label| i32::from(label)).collect();

        let mut master = StdRng::seed_from_u64(settings.random_state);
        let seeds: Vec<u64> = (0..settings.n_estimators)
            .map(|_| master.random::<u64>())
            .collect();

        let members = seeds
            .par_iter()
            .map(|&seed| {
                let mut parameters = RandomForestClassifierParameters::default()
                    .with_n_trees(1)
                    .with_seed(seed);
                if let Some(depth) = max_depth {
                    parameters = parameters.with_max_depth(depth);
                }
                RandomForestClassifier::fit(&matrix, &labels, parameters)
                    .map_err(|e| AppError::InternalError(format!("fitting forest: {}", e)))
            })
            .collect::<Result<Vec<Member>, AppError>>()?;

        let mut forest = Self {
            n_features,
            members,
            importances: vec![0.0; n_features],
        };
        forest.importances = forest.permutation_importances(x, y, &mut master)?;

        tracing::debug!(
            "Fitted {} trees on {} rows",
            forest.members.len(),
            x.len()
        );

        Ok(forest)
    }

    /// Class probabilities `[p(0), p(1)]` as the share of member votes.
    pub fn predict_proba(&self, x: &[f64]) -> Result<[f64; 2], AppError> {
        if x.len() != self.n_features {
            return Err(AppError::Unprocessable(format!(
                "expected {} features, got {}",
                self.n_features,
                x.len()
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Unprocessable(
                "features must be finite numbers".to_string(),
            ));
        }

        let p1 = self
            .positive_shares(&[x.to_vec()])?
            .first()
            .copied()
            .unwrap_or(0.0);
        Ok([1.0 - p1, p1])
    }

    /// Permutation importance per feature, summing to one.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    /// Share of members voting for class 1, per row.
    fn positive_shares(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, AppError> {
        let matrix = DenseMatrix::from_2d_vec(&rows.to_vec());
        let mut votes = vec![0.0; rows.len()];

        for member in &self.members {
            let predicted = member
                .predict(&matrix)
                .map_err(|e| AppError::Unprocessable(format!("forest prediction: {}", e)))?;
            for (vote, label) in votes.iter_mut().zip(predicted) {
                if label == 1 {
                    *vote += 1.0;
                }
            }
        }

        let n = self.members.len() as f64;
        Ok(votes.into_iter().map(|v| v / n).collect())
    }

    fn brier_loss(&self, rows: &[Vec<f64>], y: &[u8]) -> Result<f64, AppError> {
        let shares = self.positive_shares(rows)?;
        let total: f64 = shares
            .iter()
            .zip(y)
            .map(|(p, &label)| (p - f64::from(label)).powi(2))
            .sum();
        Ok(total / y.len() as f64)
    }

    /// Increase of the Brier loss when one column is shuffled, clipped at zero
    /// and normalised. Large stores are estimated on a seeded sample of rows.
    fn permutation_importances(
        &self,
        x: &[Vec<f64>],
        y: &[u8],
        rng: &mut StdRng,
    ) -> Result<Vec<f64>, AppError> {
        let (rows, labels): (Vec<Vec<f64>>, Vec<u8>) = if x.len() > IMPORTANCE_SAMPLE {
            index::sample(rng, x.len(), IMPORTANCE_SAMPLE)
                .into_iter()
                .map(|i| (x[i].clone(), y[i]))
                .unzip()
        } else {
            (x.to_vec(), y.to_vec())
        };

        let baseline = self.brier_loss(&rows, &labels)?;
        let mut importances = Vec::with_capacity(self.n_features);

        for feature in 0..self.n_features {
            let mut column: Vec<f64> = rows.iter().map(|row| row[feature]).collect();
            column.shuffle(rng);

            let permuted: Vec<Vec<f64>> = rows
                .iter()
                .zip(&column)
                .map(|(row, &value)| {
                    let mut row = row.clone();
                    row[feature] = value;
                    row
                })
                .collect();

            importances.push((self.brier_loss(&permuted, &labels)? - baseline).max(0.0));
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        Ok(importances)
    }
}
