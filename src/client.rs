use crate::errors::AppError;
use crate::models::{
    AcceptedDescription, ApplicantFeatures, ApplicantRecord, DecisionRequest, DecisionResponse,
    FeatureImportance, ModelInfo,
};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Client for the scoring service, as used by the questionnaire front end.
#[derive(Clone)]
pub struct ScoringClient {
    client: reqwest::Client,
    base_url: String,
}

impl ScoringClient {
    /// Creates a new `ScoringClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Root URL of the service, e.g. `https://host` (routes live under `/api`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        // First requests may train the model, hence the generous timeout.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(360))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create scoring client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// Probability of default for the applicant.
    pub async fn score(&self, features: &ApplicantFeatures) -> Result<f64, AppError> {
        let url = self.url("make_prediction");
        tracing::info!("Requesting score from {}", url);

        let response = self
            .client
            .post(&url)
            .json(features)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Scoring request failed: {}", e)))?;

        Self::parse(response).await
    }

    /// Saves the operator's decision for an applicant.
    pub async fn save_decision(
        &self,
        decision: &DecisionRequest,
    ) -> Result<DecisionResponse, AppError> {
        let url = self.url("decision");
        tracing::info!(
            "Saving decision for customer {} (TARGET={})",
            decision.sk_id_curr,
            decision.target
        );

        let response = self
            .client
            .post(&url)
            .json(decision)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Decision request failed: {}", e)))?;

        Self::parse(response).await
    }

    pub async fn feature_importance(&self) -> Result<Vec<FeatureImportance>, AppError> {
        self.get("get_feature_importance").await
    }

    pub async fn accepted_description(&self) -> Result<AcceptedDescription, AppError> {
        self.get("get_accepted_description").await
    }

    /// Fetches a historical applicant by client number.
    pub async fn customer(&self, id: i64) -> Result<ApplicantRecord, AppError> {
        self.get(&format!("get_customer/{}", id)).await
    }

    /// Asks the service to retrain on its current store.
    pub async fn train(&self) -> Result<ModelInfo, AppError> {
        let response = self
            .client
            .post(self.url("train_model"))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Training request failed: {}", e)))?;

        Self::parse(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Request to {} failed: {}", url, e)))?;

        Self::parse(response).await
    }

    /// Maps service errors back onto `AppError` so callers can branch on them.
    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AppError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                AppError::ExternalApiError(format!("Invalid response from scoring service: {}", e))
            });
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        tracing::error!("Scoring service error {}: {}", status, message);

        Err(match status.as_u16() {
            400 => AppError::BadRequest(message),
            404 => AppError::NotFound(message),
            409 => AppError::Conflict(message),
            422 => AppError::Unprocessable(message),
            _ => AppError::ExternalApiError(format!("{}: {}", status, message)),
        })
    }
}
