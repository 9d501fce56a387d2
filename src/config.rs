use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MODEL_PATH: &str = "models/stock_lstm_model.json";
pub const DEFAULT_SCALER_PATH: &str = "models/scaler.json";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Locations of the two files produced by one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            scaler_path: PathBuf::from(DEFAULT_SCALER_PATH),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub artifacts: ArtifactPaths,
    pub bind_addr: SocketAddr,
    pub provider_timeout: Duration,
    pub provider_base_url: Option<String>,
    pub auto_lookback_days: u32,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = get("HOST", "0.0.0.0");
        let port = get("PORT", "8000");
        let addr = format!("{}:{}", host, port);
        let bind_addr = addr.parse::<SocketAddr>().map_err(|_| ConfigError::Invalid {
            key: "HOST/PORT".to_string(),
            value: addr.clone(),
        })?;

        let timeout_raw = get("PROVIDER_TIMEOUT_SECS", "10");
        let timeout_secs = timeout_raw
            .parse::<u64>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or(ConfigError::Invalid {
                key: "PROVIDER_TIMEOUT_SECS".to_string(),
                value: timeout_raw.clone(),
            })?;

        let lookback_raw = get("AUTO_LOOKBACK_DAYS", "90");
        let auto_lookback_days = lookback_raw.parse::<u32>().map_err(|_| ConfigError::Invalid {
            key: "AUTO_LOOKBACK_DAYS".to_string(),
            value: lookback_raw.clone(),
        })?;

        Ok(Self {
            artifacts: ArtifactPaths {
                model_path: PathBuf::from(get("MODEL_PATH", DEFAULT_MODEL_PATH)),
                scaler_path: PathBuf::from(get("SCALER_PATH", DEFAULT_SCALER_PATH)),
            },
            bind_addr,
            provider_timeout: Duration::from_secs(timeout_secs),
            provider_base_url: lookup("MARKET_DATA_URL"),
            auto_lookback_days,
        })
    }
}
