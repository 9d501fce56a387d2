/// HTTP integration tests for the prediction API.
///
/// The router is driven in-process with `tower::ServiceExt::oneshot`, a small
/// untrained model and a stub market data provider, so no network or
/// artifacts on disk are needed.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use stock_lstm_api::app::create_app;
use stock_lstm_api::external::price_provider::{
    ExternalPricePoint, PriceProvider, PriceProviderError,
};
use stock_lstm_api::models::{ArtifactMetadata, ModelArtifact, ScalerArtifact};
use stock_lstm_api::services::inference_service::InferenceContext;
use stock_lstm_api::services::lstm::{LstmConfig, LstmModel};
use stock_lstm_api::services::scaler::MinMaxScaler;
use stock_lstm_api::services::windowing::WINDOW_SIZE;
use stock_lstm_api::state::{AppState, ModelStatus};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct StubProvider;

impl StubProvider {
    fn series(n: usize) -> Vec<ExternalPricePoint> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        (0..n)
            .map(|i| ExternalPricePoint {
                date: start + Duration::days(i as i64),
                close: 150.0 + (i as f64 * 0.3).sin() * 5.0,
            })
            .collect()
    }
}

#[async_trait]
impl PriceProvider for StubProvider {
    async fn fetch_daily_range(
        &self,
        ticker: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        match ticker {
            "INVALIDTICKER" => Err(PriceProviderError::NotFound),
            "EMPTY" => Ok(Vec::new()),
            "SHORT" => Ok(Self::series(30)),
            "BUSY" => Err(PriceProviderError::RateLimited),
            "DOWN" => Err(PriceProviderError::Network("connection reset".to_string())),
            _ => Ok(Self::series(75)),
        }
    }
}

fn loaded_status() -> ModelStatus {
    status_with_scaler(MinMaxScaler::fit(&[120.0, 180.0]).unwrap())
}

fn status_with_scaler(scaler: MinMaxScaler) -> ModelStatus {
    let metadata = ArtifactMetadata {
        training_run_id: Uuid::new_v4(),
        window_size: WINDOW_SIZE,
        ticker: "TEST".to_string(),
        data_start: None,
        data_end: None,
        trained_at: Utc::now(),
    };
    let model = LstmModel::new(
        LstmConfig::default()
            .with_lstm_units(vec![8])
            .with_dense_units(vec![4])
            .with_dropout(0.0),
    )
    .unwrap();

    let ctx = InferenceContext::from_artifacts(
        ModelArtifact {
            metadata: metadata.clone(),
            model,
        },
        ScalerArtifact { metadata, scaler },
        WINDOW_SIZE,
    )
    .unwrap();
    ModelStatus::Loaded(ctx)
}

fn app(status: ModelStatus) -> Router {
    create_app(AppState::new(status, Arc::new(StubProvider), 90))
}

fn loaded_app() -> Router {
    app(loaded_status())
}

fn unloaded_app() -> Router {
    app(ModelStatus::LoadFailed("artifact not found".to_string()))
}

fn prices(n: usize) -> Vec<f64> {
    (0..n).map(|i| 140.0 + i as f64 * 0.5).collect()
}

fn predict_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_reports_loaded_model() {
    let (status, body) = send(loaded_app(), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "API is running and the model is loaded.");
}

#[tokio::test]
async fn test_health_is_ok_without_model() {
    let (status, body) = send(unloaded_app(), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["status"].as_str().unwrap().starts_with("WARNING"));

    let (status, _) = send(app(ModelStatus::Unloaded), get("/")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_every_response_has_process_time() {
    let response = loaded_app().oneshot(get("/")).await.unwrap();
    let value = response
        .headers()
        .get("X-Process-Time")
        .expect("missing X-Process-Time")
        .to_str()
        .unwrap()
        .parse::<f64>()
        .unwrap();
    assert!(value >= 0.0);

    let response = unloaded_app()
        .oneshot(predict_request(json!({ "historical_prices": prices(60) }).to_string()))
        .await
        .unwrap();
    assert!(response.headers().contains_key("X-Process-Time"));
}

// ---------------------------------------------------------------------------
// POST /predict
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_predict_with_full_window() {
    let body = json!({ "historical_prices": prices(60) }).to_string();
    let (status, body) = send(loaded_app(), predict_request(body)).await;

    assert_eq!(status, StatusCode::OK);
    let predicted = body["predicted_next_day_close_price"].as_f64().unwrap();
    assert!(predicted.is_finite());
}

#[tokio::test]
async fn test_predict_rejects_wrong_length() {
    for n in [0, 59, 61] {
        let body = json!({ "historical_prices": prices(n) }).to_string();
        let (status, body) = send(loaded_app(), predict_request(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "length {}", n);
        assert_eq!(
            body["detail"],
            "Input must contain exactly 60 historical prices."
        );
    }
}

#[tokio::test]
async fn test_predict_rejects_malformed_body() {
    let mut values: Vec<Value> = prices(59).into_iter().map(Value::from).collect();
    values.push(Value::from("abc"));
    let non_numeric = json!({ "historical_prices": values }).to_string();

    for body in [non_numeric, "{}".to_string(), "not json".to_string()] {
        let (status, body) = send(loaded_app(), predict_request(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());
    }
}

#[tokio::test]
async fn test_predict_without_model_is_unavailable() {
    let body = json!({ "historical_prices": prices(60) }).to_string();
    let (status, body) = send(unloaded_app(), predict_request(body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_predict_is_idempotent() {
    let app = loaded_app();
    let body = json!({ "historical_prices": prices(60) }).to_string();

    let (_, first) = send(app.clone(), predict_request(body.clone())).await;
    let (_, second) = send(app, predict_request(body)).await;
    assert_eq!(
        first["predicted_next_day_close_price"],
        second["predicted_next_day_close_price"]
    );
}

#[tokio::test]
async fn test_predict_pipeline_failure_is_internal_error() {
    // An unbounded fitted range makes every unscaled prediction non-finite.
    let scaler = MinMaxScaler {
        data_min: -f64::MAX,
        data_max: f64::MAX,
        feature_range: (0.0, 1.0),
    };
    let app = app(status_with_scaler(scaler));

    let body = json!({ "historical_prices": prices(60) }).to_string();
    let (status, body) = send(app.clone(), predict_request(body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Internal error during prediction");

    let (status, body) = send(app, get("/predict-auto/AAPL")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Internal error during prediction");
}

// ---------------------------------------------------------------------------
// GET /predict-auto/{symbol}
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_predict_auto_success() {
    let (status, body) = send(loaded_app(), get("/predict-auto/aapl")).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["codigo_acao"], "AAPL");
    assert_eq!(body["historical_prices"].as_array().unwrap().len(), 60);
    assert!(body["predicted_next_day_close_price"].as_f64().unwrap().is_finite());

    // 75 daily points from 2024-03-01
    assert_eq!(body["last_known_date"], "2024-05-14");
    assert_eq!(body["prediction_date"], "2024-05-15");
}

#[tokio::test]
async fn test_predict_auto_unknown_symbol() {
    for symbol in ["INVALIDTICKER", "empty"] {
        let (status, body) = send(loaded_app(), get(&format!("/predict-auto/{}", symbol))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].is_string());
    }
}

#[tokio::test]
async fn test_predict_auto_without_model_is_unavailable() {
    let (status, _) = send(unloaded_app(), get("/predict-auto/INVALIDTICKER")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_predict_auto_insufficient_history() {
    let (status, body) = send(loaded_app(), get("/predict-auto/SHORT")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("Need 60"));
}

#[tokio::test]
async fn test_predict_auto_provider_failures() {
    let response = loaded_app().oneshot(get("/predict-auto/BUSY")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["Retry-After"].to_str().unwrap(), "60");

    let (status, _) = send(loaded_app(), get("/predict-auto/DOWN")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
