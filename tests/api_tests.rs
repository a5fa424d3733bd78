/// End-to-end tests of the scoring API against a temporary flat-file store
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use risk_scoring_api::config::Config;
use risk_scoring_api::handlers::{self, AppState};
use risk_scoring_api::models::ForestSettings;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;

const HEADER: &str = "SK_ID_CURR,FLAG_OWN_CAR,FLAG_OWN_REALTY,CNT_CHILDREN,AMT_INCOME_TOTAL,AMT_CREDIT,AMT_ANNUITY,EXT_SOURCE_1,DAYS_BIRTH,ANNUITY_INCOME_PERC,DAYS_EMPLOYED_PERC,INCOME_CREDIT_PERC,PAYMENT_RATE";

const FEATURES: [&str; 12] = [
    "FLAG_OWN_CAR",
    "FLAG_OWN_REALTY",
    "CNT_CHILDREN",
    "AMT_INCOME_TOTAL",
    "AMT_CREDIT",
    "AMT_ANNUITY",
    "EXT_SOURCE_1",
    "DAYS_BIRTH",
    "ANNUITY_INCOME_PERC",
    "DAYS_EMPLOYED_PERC",
    "INCOME_CREDIT_PERC",
    "PAYMENT_RATE",
];

/// Columns that cycle with the row number and carry no signal.
const NOISE: [&str; 4] = ["FLAG_OWN_CAR", "FLAG_OWN_REALTY", "CNT_CHILDREN", "AMT_CREDIT"];

const ROWS: usize = 40;

/// Feature values of fixture row `i`; rows below `ROWS / 2` defaulted.
fn row_values(i: usize) -> [f64; 12] {
    let income = 20000.0 + 1000.0 * i as f64;
    let credit = 100000.0 + 500.0 * (i % 5) as f64;
    let annuity = 5000.0 + 100.0 * i as f64;
    [
        (i % 2) as f64,
        ((i / 3) % 2) as f64,
        (i % 3) as f64,
        income,
        credit,
        annuity,
        i as f64 / ROWS as f64,
        -8000.0 - 100.0 * i as f64,
        annuity / income,
        19.2 + 0.1 * i as f64,
        income / credit,
        annuity / credit,
    ]
}

fn write_store(dir: &Path) {
    let mut train = format!("{}\n", HEADER);
    let mut labels = String::from("TARGET\n");
    for i in 0..ROWS {
        let cells: Vec<String> = row_values(i).iter().map(|v| v.to_string()).collect();
        train.push_str(&format!("{},{}\n", 100000 + i, cells.join(",")));
        labels.push_str(if i < ROWS / 2 { "1\n" } else { "0\n" });
    }
    std::fs::write(dir.join("train.csv"), train).unwrap();
    std::fs::write(dir.join("labels.csv"), labels).unwrap();
}

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("scoring-api-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Helper function to create test config
fn create_test_config(dir: &Path) -> Config {
    Config {
        port: 8000,
        data_dir: dir.to_path_buf(),
        train_file: dir.join("train.csv"),
        labels_file: dir.join("labels.csv"),
        model_path: dir.join("model.json"),
        forest: ForestSettings::default(),
        rate_limit_per_second: 10,
        rate_limit_burst: 20,
    }
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", handlers::api_routes())
        .with_state(state)
}

/// Request body with the features of fixture row `i`.
fn applicant(i: usize) -> Value {
    let body: serde_json::Map<String, Value> = FEATURES
        .iter()
        .zip(row_values(i))
        .map(|(name, value)| (name.to_string(), json!(value)))
        .collect();
    Value::Object(body)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn scores_are_stable_after_training() {
    let dir = temp_dir();
    write_store(&dir);
    let state = Arc::new(AppState::new(create_test_config(&dir)));
    let app = app(Arc::clone(&state));

    let (status, risky) = send(&app, "POST", "/api/make_prediction", Some(applicant(2))).await;
    assert_eq!(status, StatusCode::OK);
    let risky = risky.as_f64().unwrap();
    assert!(risky > 0.5, "risky applicant scored {}", risky);

    let (_, safe) = send(&app, "POST", "/api/make_prediction", Some(applicant(37))).await;
    assert!(safe.as_f64().unwrap() < 0.5);

    let (_, again) = send(&app, "POST", "/api/make_prediction", Some(applicant(2))).await;
    assert_eq!(again.as_f64().unwrap(), risky);
    assert_eq!(state.registry.training_runs(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn concurrent_first_requests_train_once() {
    let dir = temp_dir();
    write_store(&dir);
    let state = Arc::new(AppState::new(create_test_config(&dir)));
    let app = app(Arc::clone(&state));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        tasks.push(tokio::spawn(async move {
            send(&app, "POST", "/api/make_prediction", Some(applicant(8))).await
        }));
    }

    let mut scores = Vec::new();
    for task in tasks {
        let (status, score) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        scores.push(score.as_f64().unwrap());
    }

    assert!(scores.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(state.registry.training_runs(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let dir = temp_dir();
    write_store(&dir);
    let app = app(Arc::new(AppState::new(create_test_config(&dir))));

    let mut missing = applicant(20);
    missing.as_object_mut().unwrap().remove("PAYMENT_RATE");
    let (status, body) = send(&app, "POST", "/api/make_prediction", Some(missing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("PAYMENT_RATE"));

    let mut out_of_range = applicant(20);
    out_of_range["EXT_SOURCE_1"] = json!(1.5);
    let (status, body) = send(&app, "POST", "/api/make_prediction", Some(out_of_range)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "EXT_SOURCE_1 must be between 0 and 1");

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn unreadable_store_fails_scoring() {
    let dir = temp_dir();
    let app = app(Arc::new(AppState::new(create_test_config(&dir))));

    let (status, body) = send(&app, "POST", "/api/make_prediction", Some(applicant(20))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Storage error");

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn decisions_extend_the_store() {
    let dir = temp_dir();
    write_store(&dir);
    let app = app(Arc::new(AppState::new(create_test_config(&dir))));

    let (_, before) = send(&app, "GET", "/api/get_accepted_description", None).await;
    assert_eq!(before["accepted_records"], 20);

    let mut duplicate = applicant(36);
    duplicate["SK_ID_CURR"] = json!(100003);
    duplicate["TARGET"] = json!(0);
    let (status, _) = send(&app, "POST", "/api/decision", Some(duplicate)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let mut decision = applicant(36);
    decision["SK_ID_CURR"] = json!(555555);
    decision["TARGET"] = json!(0);
    let (status, body) = send(&app, "POST", "/api/decision", Some(decision)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"status": "saved", "SK_ID_CURR": 555555}));

    let (status, customer) = send(&app, "GET", "/api/get_customer/555555", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(customer["EXT_SOURCE_1"], 0.9);
    assert_eq!(customer["TARGET"], 0);

    let (_, after) = send(&app, "GET", "/api/get_accepted_description", None).await;
    assert_eq!(after["accepted_records"], 21);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn unknown_customer_is_not_found() {
    let dir = temp_dir();
    write_store(&dir);
    let app = app(Arc::new(AppState::new(create_test_config(&dir))));

    let (status, body) = send(&app, "GET", "/api/get_customer/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Customer 42 not found");

    let (status, body) = send(&app, "GET", "/api/get_customer/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, customer) = send(&app, "GET", "/api/get_customer/100001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(customer["TARGET"], 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn feature_importance_ranks_a_signal_column_first() {
    let dir = temp_dir();
    write_store(&dir);
    let app = app(Arc::new(AppState::new(create_test_config(&dir))));

    let (status, table) = send(&app, "GET", "/api/get_feature_importance", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = table.as_array().unwrap();
    assert_eq!(rows.len(), 12);
    let top = rows[0]["feature"].as_str().unwrap();
    assert!(!NOISE.contains(&top), "noise column {} ranked first", top);

    let importances: Vec<f64> = rows.iter().map(|r| r["importance"].as_f64().unwrap()).collect();
    assert!(importances.windows(2).all(|w| w[0] >= w[1]));

    let total: f64 = rows.iter().map(|r| r["importance"].as_f64().unwrap()).sum();
    assert!((total - 1.0).abs() < 1e-9);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn persisted_model_survives_restart_until_store_changes() {
    let dir = temp_dir();
    write_store(&dir);
    let config = create_test_config(&dir);

    let first = Arc::new(AppState::new(config.clone()));
    let (_, score) = send(&app(Arc::clone(&first)), "POST", "/api/make_prediction", Some(applicant(12))).await;
    assert!(dir.join("model.json").exists());

    let restarted = Arc::new(AppState::new(config.clone()));
    let restarted_app = app(Arc::clone(&restarted));
    let (_, again) = send(&restarted_app, "POST", "/api/make_prediction", Some(applicant(12))).await;
    assert_eq!(again, score);
    assert_eq!(restarted.registry.training_runs(), 0);

    let mut decision = applicant(12);
    decision["SK_ID_CURR"] = json!(777);
    decision["TARGET"] = json!(1);
    send(&restarted_app, "POST", "/api/decision", Some(decision)).await;

    let after_append = Arc::new(AppState::new(config));
    let (status, info) = send(&app(Arc::clone(&after_append)), "GET", "/api/model", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["version"], 2);
    assert_eq!(info["training_records"], 41);
    assert_eq!(after_append.registry.training_runs(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn train_model_bumps_the_version() {
    let dir = temp_dir();
    write_store(&dir);
    let app = app(Arc::new(AppState::new(create_test_config(&dir))));

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health["model_version"], Value::Null);

    let (_, info) = send(&app, "GET", "/api/model", None).await;
    assert_eq!(info["version"], 1);

    let (status, info) = send(&app, "POST", "/api/train_model", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["version"], 2);
    assert_eq!(info["settings"]["n_estimators"], 5);

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health["model_version"], 2);

    std::fs::remove_dir_all(&dir).ok();
}
