use crate::analytics;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use crate::registry::ModelRegistry;
use crate::store::ApplicantStore;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use moka::future::Cache;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const ACCEPTED_KEY: &str = "accepted";

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Flat-file store of historical applications.
    pub store: Arc<ApplicantStore>,
    /// Holder of the model serving predictions.
    pub registry: Arc<ModelRegistry>,
    /// Accepted customer statistics; invalidated whenever a decision is saved.
    pub accepted_cache: Cache<String, AcceptedDescription>,
    /// Historical records by identifier. Stored records never change, so
    /// entries only expire by TTL.
    pub customer_cache: Cache<i64, ApplicantRecord>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(ApplicantStore::new(
            config.train_file.clone(),
            config.labels_file.clone(),
        ));
        let registry = Arc::new(ModelRegistry::new(
            Arc::clone(&store),
            config.forest.clone(),
            config.model_path.clone(),
        ));

        let accepted_cache = Cache::builder()
            .time_to_live(Duration::from_secs(3600))
            .max_capacity(1)
            .build();

        let customer_cache = Cache::builder()
            .time_to_live(Duration::from_secs(300))
            .max_capacity(10_000)
            .build();

        Self {
            config,
            store,
            registry,
            accepted_cache,
            customer_cache,
        }
    }
}

/// Scoring API routes, mounted under `/api`.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/make_prediction", post(make_prediction))
        .route("/decision", post(save_decision))
        .route("/get_feature_importance", get(get_feature_importance))
        .route("/get_accepted_description", get(get_accepted_description))
        .route("/get_customer/:id", get(get_customer))
        .route("/train_model", post(train_model))
        .route("/model", get(model_info))
}

/// Health check endpoint.
///
/// Reports whether a model is loaded without triggering training.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let model_version = state.registry.loaded().await.map(|m| m.info.version);
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "risk-scoring-api",
            "version": env!("CARGO_PKG_VERSION"),
            "model_version": model_version,
        })),
    )
}

/// POST /api/make_prediction
///
/// Scores one applicant and returns the bare probability of default.
/// The model is trained on first use.
pub async fn make_prediction(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ScoreRequest>, JsonRejection>,
) -> Result<Json<f64>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    tracing::info!("POST /make_prediction - customer: {:?}", request.sk_id_curr);

    let issues = request.features.validate();
    if !issues.is_empty() {
        return Err(AppError::BadRequest(issues.join("; ")));
    }

    let score = state.registry.score(&request.features).await?;
    tracing::info!(
        "Scored customer {:?}: p(default) = {:.4}",
        request.sk_id_curr,
        score
    );

    Ok(Json(score))
}

/// POST /api/decision
///
/// Stores the operator's decision for an applicant so later trainings learn from it.
pub async fn save_decision(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DecisionResponse>), AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    tracing::info!(
        "POST /decision - customer {} TARGET={}",
        request.sk_id_curr,
        request.target
    );

    let record = request
        .into_record()
        .map_err(|issues| AppError::BadRequest(issues.join("; ")))?;
    state.store.append(&record).await?;
    state.accepted_cache.invalidate_all();

    Ok((
        StatusCode::CREATED,
        Json(DecisionResponse {
            status: "saved".to_string(),
            sk_id_curr: record.sk_id_curr,
        }),
    ))
}

/// GET /api/get_feature_importance
pub async fn get_feature_importance(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FeatureImportance>>, AppError> {
    let model = state.registry.current().await?;
    Ok(Json(analytics::importance_table(
        &model.feature_names,
        model.forest.feature_importances(),
    )))
}

/// GET /api/get_accepted_description
///
/// Statistics of historically accepted applications, cached until the next decision.
pub async fn get_accepted_description(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AcceptedDescription>, AppError> {
    if let Some(cached) = state.accepted_cache.get(ACCEPTED_KEY).await {
        tracing::debug!("Accepted description cache HIT");
        return Ok(Json(cached));
    }

    let records = state.store.load().await?;
    let description = analytics::describe_accepted(&records);
    tracing::info!(
        "Described {} accepted records out of {}",
        description.accepted_records,
        records.len()
    );

    state
        .accepted_cache
        .insert(ACCEPTED_KEY.to_string(), description.clone())
        .await;

    Ok(Json(description))
}

/// GET /api/get_customer/:id
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ApplicantRecord>, AppError> {
    let Path(id) = id.map_err(|e| AppError::BadRequest(e.body_text()))?;
    tracing::info!("GET /get_customer/{}", id);

    if let Some(cached) = state.customer_cache.get(&id).await {
        return Ok(Json(cached));
    }

    let record = state.store.find(id).await?;
    state.customer_cache.insert(id, record.clone()).await;
    Ok(Json(record))
}

/// POST /api/train_model
///
/// Retrains on the current store, e.g. after decisions were saved.
pub async fn train_model(State(state): State<Arc<AppState>>) -> Result<Json<ModelInfo>, AppError> {
    tracing::info!("POST /train_model");
    let model = state.registry.retrain().await?;
    Ok(Json(model.info.clone()))
}

/// GET /api/model
pub async fn model_info(State(state): State<Arc<AppState>>) -> Result<Json<ModelInfo>, AppError> {
    let model = state.registry.current().await?;
    Ok(Json(model.info.clone()))
}
