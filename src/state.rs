use std::sync::Arc;

use crate::errors::AppError;
use crate::external::price_provider::PriceProvider;
use crate::services::inference_service::InferenceContext;

/// Readiness of the prediction artifacts. Resolved once at startup, before the
/// listener accepts traffic, and never changed afterwards.
#[derive(Debug)]
pub enum ModelStatus {
    Unloaded,
    Loaded(InferenceContext),
    LoadFailed(String),
}

impl ModelStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelStatus::Loaded(_))
    }

    /// The inference context, or `ArtifactsUnavailable` for any other state.
    pub fn context(&self) -> Result<&InferenceContext, AppError> {
        match self {
            ModelStatus::Loaded(ctx) => Ok(ctx),
            ModelStatus::Unloaded | ModelStatus::LoadFailed(_) => Err(AppError::ArtifactsUnavailable),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<ModelStatus>,
    pub price_provider: Arc<dyn PriceProvider>,
    pub auto_lookback_days: u32,
}

impl AppState {
    pub fn new(model: ModelStatus, price_provider: Arc<dyn PriceProvider>, auto_lookback_days: u32) -> Self {
        Self {
            model: Arc::new(model),
            price_provider,
            auto_lookback_days,
        }
    }
}
