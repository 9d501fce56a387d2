pub mod artifact;
pub mod prediction;
pub mod price_point;

pub use artifact::{ArtifactMetadata, ModelArtifact, ScalerArtifact};
pub use prediction::{AutoPredictionResponse, HealthResponse, PredictionRequest, PredictionResponse};
pub use price_point::{PricePoint, PriceSeries};
