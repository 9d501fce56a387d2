use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use ndarray::Array1;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ArtifactPaths;
use crate::external::price_provider::PriceProvider;
use crate::models::{ArtifactMetadata, ModelArtifact, PriceSeries, ScalerArtifact};
use crate::services::artifact_service::{self, ArtifactError};
use crate::services::lstm::{LstmConfig, LstmModel, ModelError};
use crate::services::metrics::EvaluationMetrics;
use crate::services::price_service;
use crate::services::scaler::{MinMaxScaler, ScalerError};
use crate::services::windowing::{SequenceSet, WINDOW_SIZE};

pub const SYNTHETIC_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Scaler(#[from] ScalerError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("failed to load prices: {0}")]
    Source(String),
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub ticker: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Fraction of the series whose windows are used for fitting
    pub train_split: f64,
    pub window_size: usize,
    pub model: LstmConfig,
    pub artifacts: ArtifactPaths,
    /// Offline price file; takes precedence over the provider
    pub prices_csv: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            ticker: "AAPL".to_string(),
            start: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2024, 7, 20).unwrap_or_default(),
            train_split: 0.8,
            window_size: WINDOW_SIZE,
            model: LstmConfig::default(),
            artifacts: ArtifactPaths::default(),
            prices_csv: None,
        }
    }
}

/// Outcome of one training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub training_run_id: Uuid,
    pub observations: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub loss_history: Vec<f64>,
    /// `None` when the split leaves no test windows
    pub evaluation: Option<EvaluationMetrics>,
}

/// Fit the scaler and model on `series` and evaluate on the held-out tail.
pub fn train_on_series(
    series: &PriceSeries,
    config: &TrainingConfig,
) -> Result<(ModelArtifact, ScalerArtifact, TrainingReport), TrainingError> {
    if !(config.train_split > 0.0 && config.train_split <= 1.0) {
        return Err(TrainingError::InvalidConfig(format!(
            "train_split must be in (0, 1], got {}",
            config.train_split
        )));
    }

    let window = config.window_size;
    let closes = series.closes();
    let scaler = MinMaxScaler::fit(&closes)?;
    let scaled = scaler.transform_slice(&closes);

    let train_len = (closes.len() as f64 * config.train_split) as usize;
    let train_set = SequenceSet::from_series(&scaled[..train_len], window);
    if train_set.is_empty() {
        return Err(TrainingError::InsufficientData(format!(
            "Need more than {} training observations, got {} of {}",
            window,
            train_len,
            closes.len()
        )));
    }

    let test_set = if train_len >= window && train_len < closes.len() {
        SequenceSet::from_series(&scaled[train_len - window..], window)
    } else {
        SequenceSet::from_series(&[], window)
    };

    info!(
        "Training on {} sequences, testing on {} (window {})",
        train_set.len(),
        test_set.len(),
        window
    );

    let model_config = LstmConfig {
        input_size: 1,
        ..config.model.clone()
    };
    let mut model = LstmModel::new(model_config)?;
    let loss_history = model.fit(&train_set.inputs, &train_set.targets)?;

    let evaluation = if test_set.is_empty() {
        warn!("No test windows left after the split; skipping evaluation");
        None
    } else {
        let scaled_predictions = model.predict(&test_set.inputs)?;
        let predictions: Array1<f64> = scaler.inverse_transform(&scaled_predictions).column(0).to_owned();
        let actual = Array1::from(closes[train_len..].to_vec());
        let metrics = EvaluationMetrics::compute(&actual, &predictions);
        info!(
            "Test metrics: MAE {:.4}, RMSE {:.4}, MAPE {:.2}%",
            metrics.mae, metrics.rmse, metrics.mape
        );
        Some(metrics)
    };

    let metadata = ArtifactMetadata {
        training_run_id: Uuid::new_v4(),
        window_size: window,
        ticker: config.ticker.clone(),
        data_start: series.first_date(),
        data_end: series.last_date(),
        trained_at: Utc::now(),
    };

    let report = TrainingReport {
        training_run_id: metadata.training_run_id,
        observations: closes.len(),
        train_samples: train_set.len(),
        test_samples: test_set.len(),
        loss_history,
        evaluation,
    };

    Ok((
        ModelArtifact {
            metadata: metadata.clone(),
            model,
        },
        ScalerArtifact { metadata, scaler },
        report,
    ))
}

/// Resolve the training series: CSV file, then the provider, then synthetic data.
pub async fn load_training_series(
    provider: &dyn PriceProvider,
    config: &TrainingConfig,
) -> Result<PriceSeries, TrainingError> {
    if let Some(path) = &config.prices_csv {
        return price_service::load_csv(path).map_err(|e| TrainingError::Source(format!("{:#}", e)));
    }

    match price_service::fetch_training_series(provider, &config.ticker, config.start, config.end).await {
        Ok(series) => Ok(series),
        Err(e) => {
            warn!(
                "Could not download {} ({}). Falling back to synthetic data.",
                config.ticker, e
            );
            Ok(price_service::synthetic_series(config.start, config.end, SYNTHETIC_SEED))
        }
    }
}

/// Load data, train, and write both artifacts.
pub async fn run_training(
    provider: &dyn PriceProvider,
    config: &TrainingConfig,
) -> Result<TrainingReport, TrainingError> {
    let series = load_training_series(provider, config).await?;
    info!(
        "Loaded {} observations ({:?} to {:?})",
        series.len(),
        series.first_date(),
        series.last_date()
    );

    let (model, scaler, report) = train_on_series(&series, config)?;
    artifact_service::save_artifacts(&config.artifacts, &model, &scaler)?;
    info!("Training run {} complete", report.training_run_id);
    Ok(report)
}
