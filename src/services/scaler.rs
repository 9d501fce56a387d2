use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScalerError {
    #[error("cannot fit scaler on an empty series")]
    EmptySeries,
    #[error("series contains a non-finite value at index {0}")]
    NonFinite(usize),
}

/// Min-max scaler frozen at fit time.
///
/// Maps `data_min..=data_max` linearly onto `feature_range`. Values outside the
/// fitted range are extrapolated, not clamped, so `inverse_transform` undoes
/// `transform` for every finite input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub data_min: f64,
    pub data_max: f64,
    pub feature_range: (f64, f64),
}

impl MinMaxScaler {
    pub fn fit(series: &[f64]) -> Result<Self, ScalerError> {
        Self::fit_with_range(series, (0.0, 1.0))
    }

    pub fn fit_with_range(series: &[f64], feature_range: (f64, f64)) -> Result<Self, ScalerError> {
        if series.is_empty() {
            return Err(ScalerError::EmptySeries);
        }
        if let Some(idx) = series.iter().position(|v| !v.is_finite()) {
            return Err(ScalerError::NonFinite(idx));
        }

        let data_min = series.iter().copied().fold(f64::INFINITY, f64::min);
        let data_max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(Self {
            data_min,
            data_max,
            feature_range,
        })
    }

    /// Width of the fitted data range; a constant series gets 1.0.
    pub fn data_range(&self) -> f64 {
        let range = self.data_max - self.data_min;
        if range == 0.0 {
            1.0
        } else {
            range
        }
    }

    fn range_width(&self) -> f64 {
        self.feature_range.1 - self.feature_range.0
    }

    pub fn transform_value(&self, value: f64) -> f64 {
        (value - self.data_min) / self.data_range() * self.range_width() + self.feature_range.0
    }

    pub fn inverse_transform_value(&self, scaled: f64) -> f64 {
        (scaled - self.feature_range.0) / self.range_width() * self.data_range() + self.data_min
    }

    /// Scale a column of values (`[n, 1]`, one feature per row).
    pub fn transform(&self, values: &Array2<f64>) -> Array2<f64> {
        values.mapv(|v| self.transform_value(v))
    }

    pub fn inverse_transform(&self, scaled: &Array2<f64>) -> Array2<f64> {
        scaled.mapv(|v| self.inverse_transform_value(v))
    }

    pub fn transform_slice(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform_value(v)).collect()
    }

    pub fn is_within_range(&self, scaled: f64) -> bool {
        scaled >= self.feature_range.0 && scaled <= self.feature_range.1
    }
}
