use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::lstm::LstmModel;
use crate::services::scaler::MinMaxScaler;

/// Provenance shared by the two files written by one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub training_run_id: Uuid,
    pub window_size: usize,
    pub ticker: String,
    pub data_start: Option<NaiveDate>,
    pub data_end: Option<NaiveDate>,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub metadata: ArtifactMetadata,
    pub model: LstmModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub metadata: ArtifactMetadata,
    pub scaler: MinMaxScaler,
}
