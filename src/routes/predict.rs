use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::{AutoPredictionResponse, PredictionRequest, PredictionResponse};
use crate::services::inference_service::PipelineError;
use crate::services::price_service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/predict", post(predict))
        .route("/predict-auto/:symbol", get(predict_auto))
}

/// Caller mistakes are logged here; `AppError::Internal` is logged when rendered.
fn log_rejected_input(err: PipelineError) -> AppError {
    if let PipelineError::WindowLength { expected, actual } = &err {
        warn!("Rejected input: expected {} prices, got {}", expected, actual);
    }
    AppError::from(err)
}

pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("POST /predict - Rejected body: {}", rejection.body_text());
        AppError::Unprocessable(rejection.body_text())
    })?;
    info!(
        "POST /predict - Predicting from {} prices",
        request.historical_prices.len()
    );

    let ctx = state.model.context()?;
    let predicted = ctx
        .predict(&request.historical_prices)
        .map_err(log_rejected_input)?;

    Ok(Json(PredictionResponse {
        predicted_next_day_close_price: predicted,
    }))
}

pub async fn predict_auto(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AutoPredictionResponse>, AppError> {
    let symbol = symbol.to_uppercase();
    info!("GET /predict-auto/{} - Fetching recent closes", symbol);

    let ctx = state.model.context()?;
    let window = price_service::fetch_recent_closes(
        state.price_provider.as_ref(),
        &symbol,
        state.auto_lookback_days,
        ctx.window_size(),
    )
    .await?;

    let last_known_date = window
        .last()
        .map(|p| p.date)
        .ok_or_else(|| AppError::Internal("empty price window".to_string()))?;
    let historical_prices: Vec<f64> = window.iter().map(|p| p.close).collect();

    let predicted = ctx.predict(&historical_prices).map_err(log_rejected_input)?;

    Ok(Json(AutoPredictionResponse {
        codigo_acao: symbol,
        historical_prices,
        predicted_next_day_close_price: predicted,
        last_known_date: last_known_date.format("%Y-%m-%d").to_string(),
        prediction_date: (last_known_date + Duration::days(1))
            .format("%Y-%m-%d")
            .to_string(),
    }))
}
