use ndarray::{Array2, Array3};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ArtifactMetadata, ModelArtifact, ScalerArtifact};
use crate::services::lstm::{LstmModel, ModelError};
use crate::services::scaler::MinMaxScaler;

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("expected exactly {expected} prices, got {actual}")]
    WindowLength { expected: usize, actual: usize },
    #[error("invalid batch shape: {0}")]
    Shape(String),
    #[error("model inference failed: {0}")]
    Model(#[from] ModelError),
    #[error("model produced no output")]
    EmptyOutput,
    #[error("prediction is not a finite number: {0}")]
    NonFinite(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum ContextError {
    #[error("model and scaler come from different training runs ({model} vs {scaler})")]
    RunMismatch { model: Uuid, scaler: Uuid },
    #[error("artifacts were trained for window size {actual}, service expects {expected}")]
    WindowMismatch { expected: usize, actual: usize },
    #[error("model expects {0} features per step; only single-feature price windows are supported")]
    UnsupportedFeatures(usize),
    #[error("model weights are unusable: {0}")]
    InvalidModel(ModelError),
}

/// A single scaled window shaped `[1, window, 1]`: one sequence, one feature
/// per time step. This is the only layout the model accepts at inference.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBatch(Array3<f64>);

impl InputBatch {
    /// Build from a scaled `[window, 1]` column without reordering values.
    pub fn from_column(column: &Array2<f64>) -> Result<Self, PipelineError> {
        if column.ncols() != 1 {
            return Err(PipelineError::Shape(format!(
                "expected a single-feature column, got {} columns",
                column.ncols()
            )));
        }
        let steps = column.nrows();
        let values: Vec<f64> = column.iter().copied().collect();
        Array3::from_shape_vec((1, steps, 1), values)
            .map(Self)
            .map_err(|e| PipelineError::Shape(e.to_string()))
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn as_array(&self) -> &Array3<f64> {
        &self.0
    }
}

/// Loaded model + scaler pair. Built once at startup and shared read-only by
/// every request.
#[derive(Debug, Clone)]
pub struct InferenceContext {
    model: LstmModel,
    scaler: MinMaxScaler,
    metadata: ArtifactMetadata,
}

impl InferenceContext {
    pub fn from_artifacts(
        model: ModelArtifact,
        scaler: ScalerArtifact,
        expected_window: usize,
    ) -> Result<Self, ContextError> {
        if model.metadata.training_run_id != scaler.metadata.training_run_id {
            return Err(ContextError::RunMismatch {
                model: model.metadata.training_run_id,
                scaler: scaler.metadata.training_run_id,
            });
        }
        for window in [model.metadata.window_size, scaler.metadata.window_size] {
            if window != expected_window {
                return Err(ContextError::WindowMismatch {
                    expected: expected_window,
                    actual: window,
                });
            }
        }
        if model.model.input_size() != 1 {
            return Err(ContextError::UnsupportedFeatures(model.model.input_size()));
        }
        model.model.check_shapes().map_err(ContextError::InvalidModel)?;

        Ok(Self {
            model: model.model,
            scaler: scaler.scaler,
            metadata: model.metadata,
        })
    }

    pub fn window_size(&self) -> usize {
        self.metadata.window_size
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }

    /// Validate, scale, shape to `[1, W, 1]`, run the model and unscale.
    pub fn predict(&self, prices: &[f64]) -> Result<f64, PipelineError> {
        let window = self.window_size();
        if prices.len() != window {
            return Err(PipelineError::WindowLength {
                expected: window,
                actual: prices.len(),
            });
        }

        let column = Array2::from_shape_vec((window, 1), prices.to_vec())
            .map_err(|e| PipelineError::Shape(e.to_string()))?;
        let scaled = self.scaler.transform(&column);

        let outside = scaled.iter().filter(|v| !self.scaler.is_within_range(**v)).count();
        if outside > 0 {
            debug!("{} of {} inputs fall outside the training range", outside, window);
        }

        let batch = InputBatch::from_column(&scaled)?;
        let output = self.model.predict(batch.as_array())?;
        let scaled_prediction = output.iter().next().copied().ok_or(PipelineError::EmptyOutput)?;

        let prediction = self
            .scaler
            .inverse_transform(&Array2::from_elem((1, 1), scaled_prediction))[[0, 0]];
        if !prediction.is_finite() {
            return Err(PipelineError::NonFinite(prediction));
        }

        Ok(prediction)
    }
}
