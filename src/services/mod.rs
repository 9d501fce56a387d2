pub mod artifact_service;
pub mod inference_service;
pub mod lstm;
pub mod metrics;
pub mod price_service;
pub mod scaler;
pub mod training_service;
pub mod windowing;
