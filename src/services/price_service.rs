use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use csv::ReaderBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::external::price_provider::{PriceProvider, PriceProviderError};
use crate::models::{PricePoint, PriceSeries};

/// Fetch the most recent `window` daily closes for `symbol`, looking back
/// `lookback_days` calendar days.
pub async fn fetch_recent_closes(
    provider: &dyn PriceProvider,
    symbol: &str,
    lookback_days: u32,
    window: usize,
) -> Result<Vec<PricePoint>, AppError> {
    let points = match provider.fetch_daily_history(symbol, lookback_days).await {
        Ok(points) => points,
        Err(PriceProviderError::NotFound) => {
            return Err(AppError::NotFound(format!(
                "Could not fetch data for symbol {}. Check that the symbol is correct.",
                symbol
            )));
        }
        Err(e) => {
            warn!("Price provider failed for {}: {}", symbol, e);
            return Err(e.into());
        }
    };

    let series = PriceSeries::new(points.into_iter().map(PricePoint::from).collect());
    if series.is_empty() {
        return Err(AppError::NotFound(format!(
            "Could not fetch data for symbol {}. Check that the symbol is correct.",
            symbol
        )));
    }

    series.tail(window).map(<[PricePoint]>::to_vec).ok_or_else(|| {
        AppError::InsufficientData(format!(
            "Insufficient data. Need {} days, but only got {}.",
            window,
            series.len()
        ))
    })
}

/// Daily closes for a training run. An empty answer is reported as `NotFound`.
pub async fn fetch_training_series(
    provider: &dyn PriceProvider,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PriceSeries, PriceProviderError> {
    info!("Downloading {} closes from {} to {}", ticker, start, end);
    let points = provider.fetch_daily_range(ticker, start, end).await?;
    let series = PriceSeries::new(points.into_iter().map(PricePoint::from).collect());
    if series.is_empty() {
        return Err(PriceProviderError::NotFound);
    }
    info!("Downloaded {} records", series.len());
    Ok(series)
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date")]
    date: String,
    #[serde(alias = "Close")]
    close: f64,
}

/// Load a `date,close` CSV (header required, `YYYY-MM-DD` dates).
pub fn load_csv(path: &Path) -> Result<PriceSeries> {
    let mut reader = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open price file {}", path.display()))?;

    let mut points = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.with_context(|| format!("Invalid row {} in {}", line + 2, path.display()))?;
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .with_context(|| format!("Invalid date {:?} on row {}", row.date, line + 2))?;
        if !row.close.is_finite() {
            anyhow::bail!("Non-finite close on row {}", line + 2);
        }
        points.push(PricePoint { date, close: row.close });
    }

    let series = PriceSeries::new(points);
    info!("Loaded {} closes from {}", series.len(), path.display());
    Ok(series)
}

fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(day);
        }
        day += Duration::days(1);
    }
    days
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    // Box-Muller
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Deterministic stand-in series used when no market data is available:
/// business days from `start` to `end`, price 150 plus a linear trend up to
/// +50 and Gaussian noise (sd 5), floored at 1.
pub fn synthetic_series(start: NaiveDate, end: NaiveDate, seed: u64) -> PriceSeries {
    let days = business_days(start, end);
    let n = days.len();
    let mut rng = StdRng::seed_from_u64(seed);

    let points = days
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let trend = if n > 1 { 50.0 * i as f64 / (n - 1) as f64 } else { 0.0 };
            let close = (150.0 + trend + standard_normal(&mut rng) * 5.0).max(1.0);
            PricePoint { date, close }
        })
        .collect();

    PriceSeries::new(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::price_provider::ExternalPricePoint;
    use async_trait::async_trait;

    struct StaticProvider {
        points: Vec<ExternalPricePoint>,
        fail_with_not_found: bool,
    }

    #[async_trait]
    impl PriceProvider for StaticProvider {
        async fn fetch_daily_range(
            &self,
            _ticker: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
            if self.fail_with_not_found {
                return Err(PriceProviderError::NotFound);
            }
            Ok(self.points.clone())
        }
    }

    fn provider(n: usize) -> StaticProvider {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        StaticProvider {
            points: (0..n)
                .map(|i| ExternalPricePoint {
                    date: start + Duration::days(i as i64),
                    close: 100.0 + i as f64,
                })
                .collect(),
            fail_with_not_found: false,
        }
    }

    #[tokio::test]
    async fn test_fetch_recent_closes_takes_latest_window() {
        let closes = fetch_recent_closes(&provider(75), "AAPL", 90, 60).await.unwrap();
        assert_eq!(closes.len(), 60);
        assert_eq!(closes[0].close, 115.0);
        assert_eq!(closes[59].close, 174.0);
    }

    #[tokio::test]
    async fn test_fetch_recent_closes_insufficient() {
        let err = fetch_recent_closes(&provider(59), "AAPL", 90, 60).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientData(_)));
    }

    #[tokio::test]
    async fn test_fetch_recent_closes_not_found() {
        let err = fetch_recent_closes(&provider(0), "NOPE", 90, 60).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let failing = StaticProvider {
            points: Vec::new(),
            fail_with_not_found: true,
        };
        let err = fetch_recent_closes(&failing, "NOPE", 90, 60).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_training_series_empty_is_not_found() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(matches!(
            fetch_training_series(&provider(0), "AAPL", start, end).await,
            Err(PriceProviderError::NotFound)
        ));
        assert_eq!(
            fetch_training_series(&provider(10), "AAPL", start, end).await.unwrap().len(),
            10
        );
    }

    #[test]
    fn test_synthetic_series_is_deterministic_business_days() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let a = synthetic_series(start, end, 42);
        let b = synthetic_series(start, end, 42);

        assert_eq!(a, b);
        assert_eq!(a.len(), 65);
        assert!(a
            .points()
            .iter()
            .all(|p| !matches!(p.date.weekday(), Weekday::Sat | Weekday::Sun)));
        assert!(a.closes().iter().all(|c| *c >= 1.0 && c.is_finite()));
    }

    #[test]
    fn test_load_csv() {
        let path = std::env::temp_dir().join(format!("prices-{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "Date,Close\n2024-01-03,185.5\n2024-01-02,184.0\n2024-01-04, 181.9\n",
        )
        .unwrap();

        let series = load_csv(&path).unwrap();
        assert_eq!(series.closes(), vec![184.0, 185.5, 181.9]);

        std::fs::write(&path, "date,close\n2024-13-01,1.0\n").unwrap();
        assert!(load_csv(&path).is_err());

        std::fs::remove_file(&path).ok();
    }
}
