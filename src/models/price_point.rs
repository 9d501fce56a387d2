use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::external::price_provider::ExternalPricePoint;

// Represents a daily closing price for a given ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl From<ExternalPricePoint> for PricePoint {
    fn from(value: ExternalPricePoint) -> Self {
        Self {
            date: value.date,
            close: value.close,
        }
    }
}

/// Time-ordered closes; duplicate dates keep the last observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(mut points: Vec<PricePoint>) -> Self {
        points.sort_by(|a, b| a.date.cmp(&b.date));
        points.reverse();
        points.dedup_by_key(|p| p.date);
        points.reverse();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// The last `n` points, or `None` when fewer exist.
    pub fn tail(&self, n: usize) -> Option<&[PricePoint]> {
        if self.points.len() < n {
            return None;
        }
        Some(&self.points[self.points.len() - n..])
    }
}
