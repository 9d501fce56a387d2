use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::debug;

use crate::external::price_provider::{ExternalPricePoint, PriceProvider, PriceProviderError};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance provider - Free API, no API key required.
///
/// Every request is bounded by the client timeout so a stalled upstream
/// cannot hold a prediction request open indefinitely.
pub struct YahooFinanceProvider {
    client: reqwest::Client,
    base_url: String,
}

impl YahooFinanceProvider {
    pub fn new(timeout: Duration) -> Result<Self, PriceProviderError> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; StockLstmApi/0.1)")
            .timeout(timeout)
            .build()
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: CHART_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    #[serde(default)]
    meta: Option<YahooMeta>,
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooMeta {
    #[serde(default)]
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Convert a chart payload into sorted, de-duplicated daily closes within
/// `[start, end)`.
fn parse_chart(
    body: YahooChartResponse,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
    if let Some(error) = body.chart.error {
        if error.description.contains("No data found") || error.description.contains("delisted") {
            return Err(PriceProviderError::NotFound);
        }
        return Err(PriceProviderError::BadResponse(error.description));
    }

    let results = body
        .chart
        .result
        .ok_or_else(|| PriceProviderError::BadResponse("No results in response".into()))?;

    let Some(result) = results.into_iter().next() else {
        return Err(PriceProviderError::NotFound);
    };

    // No timestamps means the symbol exists but has no bars in range.
    let timestamps = result.timestamp.unwrap_or_default();
    let offset = result.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    if !timestamps.is_empty() && timestamps.len() != closes.len() {
        return Err(PriceProviderError::Parse(
            "Timestamp and close price arrays have different lengths".into(),
        ));
    }

    let mut points: Vec<ExternalPricePoint> = timestamps
        .iter()
        .zip(closes.iter())
        .filter_map(|(timestamp, close_opt)| {
            // Skip null values (market holidays, etc.)
            let close = (*close_opt)?;
            let date = chrono::DateTime::from_timestamp(*timestamp + offset, 0)
                .map(|dt| dt.date_naive())?;
            Some(ExternalPricePoint { date, close })
        })
        .filter(|p| p.date >= start && p.date < end)
        .collect();

    // Oldest first. A trailing intraday bar may repeat the last date; the sort is
    // stable so `PriceSeries::new` keeps that later bar when it de-duplicates.
    points.sort_by(|a, b| a.date.cmp(&b.date));

    if points.is_empty() {
        return Err(PriceProviderError::NotFound);
    }

    Ok(points)
}

#[async_trait]
impl PriceProvider for YahooFinanceProvider {
    async fn fetch_daily_range(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        let url = format!("{}/{}", self.base_url, ticker);
        let period1 = unix_midnight(start).to_string();
        let period2 = unix_midnight(end).to_string();

        debug!("Fetching {} daily closes from {} to {}", ticker, start, end);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("interval", "1d"),
                ("period1", period1.as_str()),
                ("period2", period2.as_str()),
                ("events", "history"),
            ])
            .send()
            .await
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PriceProviderError::RateLimited);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PriceProviderError::NotFound);
        }
        if !status.is_success() {
            return Err(PriceProviderError::BadResponse(format!("HTTP {}", status)));
        }

        let body: YahooChartResponse = resp
            .json()
            .await
            .map_err(|e| PriceProviderError::Parse(e.to_string()))?;

        parse_chart(body, start, end)
    }
}
