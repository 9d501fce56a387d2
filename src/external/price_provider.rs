use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalPricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Debug, Error)]
pub enum PriceProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("no data found for symbol")]
    NotFound,
}

/// Source of daily closing prices.
///
/// Implementations return points sorted by date, oldest first, with
/// non-trading days simply absent.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Daily closes in `[start, end)`.
    async fn fetch_daily_range(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError>;

    /// Daily closes for the last `days` calendar days, ending today.
    async fn fetch_daily_history(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        let end = Utc::now().date_naive();
        let start = end - Duration::days(i64::from(days));
        self.fetch_daily_range(ticker, start, end).await
    }
}
