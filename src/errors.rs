use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::external::price_provider::PriceProviderError;
use crate::services::inference_service::PipelineError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Model or scaler artifacts are not loaded")]
    ArtifactsUnavailable,
    #[error("Invalid input: {0}")]
    InputShape(String),
    #[error("Unprocessable request body: {0}")]
    Unprocessable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("Rate limited by external provider")]
    RateLimited,
    #[error("External error: {0}")]
    External(String),
    #[error("Internal pipeline error: {0}")]
    Internal(String),
}

fn detail(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::ArtifactsUnavailable => detail(
                StatusCode::SERVICE_UNAVAILABLE,
                "Model or scaler are not loaded. Check the server logs.",
            ),
            AppError::InputShape(msg) => detail(StatusCode::BAD_REQUEST, msg),
            AppError::Unprocessable(msg) => detail(StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::NotFound(msg) => detail(StatusCode::NOT_FOUND, msg),
            AppError::InsufficientData(msg) => detail(StatusCode::BAD_REQUEST, msg),
            AppError::RateLimited => {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", HeaderValue::from_static("60"));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    headers,
                    Json(json!({ "detail": "Rate limited by market data provider" })),
                )
                    .into_response()
            }
            AppError::External(msg) => detail(StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => {
                error!("Internal error during prediction: {}", msg);
                detail(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error during prediction",
                )
            }
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::WindowLength { expected, .. } => AppError::InputShape(format!(
                "Input must contain exactly {} historical prices.",
                expected
            )),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<PriceProviderError> for AppError {
    fn from(value: PriceProviderError) -> Self {
        match value {
            PriceProviderError::NotFound => {
                AppError::NotFound("No market data available for this symbol".to_string())
            }
            PriceProviderError::RateLimited => AppError::RateLimited,
            other => AppError::External(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = vec![
            (AppError::ArtifactsUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (AppError::InputShape("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Unprocessable("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::InsufficientData("x".into()), StatusCode::BAD_REQUEST),
            (AppError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (AppError::External("x".into()), StatusCode::BAD_GATEWAY),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_window_length_maps_to_bad_request() {
        let err: AppError = PipelineError::WindowLength { expected: 60, actual: 59 }.into();
        assert!(matches!(err, AppError::InputShape(_)));

        for failure in [
            PipelineError::NonFinite(f64::INFINITY),
            PipelineError::EmptyOutput,
            PipelineError::Shape("bad".into()),
        ] {
            assert!(matches!(AppError::from(failure), AppError::Internal(_)));
        }
    }

    #[test]
    fn test_provider_not_found_maps_to_not_found() {
        let err: AppError = PriceProviderError::NotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = PriceProviderError::Network("timeout".into()).into();
        assert!(matches!(err, AppError::External(_)));
    }
}
