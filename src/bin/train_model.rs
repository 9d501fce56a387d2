use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use tracing::info;

use stock_lstm_api::config::{ArtifactPaths, DEFAULT_MODEL_PATH, DEFAULT_SCALER_PATH};
use stock_lstm_api::external::yahoofinance::YahooFinanceProvider;
use stock_lstm_api::logging::{init_logging, LoggingConfig};
use stock_lstm_api::services::lstm::LstmConfig;
use stock_lstm_api::services::training_service::{run_training, TrainingConfig};
use stock_lstm_api::services::windowing::WINDOW_SIZE;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the LSTM next-day close model", long_about = None)]
struct Args {
    /// Ticker to download when no CSV file is given
    #[arg(short, long, default_value = "AAPL")]
    ticker: String,

    /// First day of training data (YYYY-MM-DD)
    #[arg(long, default_value = "2018-01-01")]
    start: NaiveDate,

    /// Last day of training data (YYYY-MM-DD)
    #[arg(long, default_value = "2024-07-20")]
    end: NaiveDate,

    /// Offline `date,close` CSV used instead of the market data provider
    #[arg(long)]
    prices_csv: Option<PathBuf>,

    #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    model_path: PathBuf,

    #[arg(long, env = "SCALER_PATH", default_value = DEFAULT_SCALER_PATH)]
    scaler_path: PathBuf,

    #[arg(long, default_value_t = 50)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 0.001)]
    learning_rate: f64,

    #[arg(long, default_value_t = 0.8)]
    train_split: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Market data request timeout in seconds
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,

    #[arg(long, env = "MARKET_DATA_URL")]
    market_data_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging(LoggingConfig::from_env())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let args = Args::parse();
    if args.end < args.start {
        anyhow::bail!("--end ({}) is before --start ({})", args.end, args.start);
    }

    let mut provider = YahooFinanceProvider::new(Duration::from_secs(args.timeout_secs))
        .context("failed to build market data client")?;
    if let Some(base_url) = &args.market_data_url {
        provider = provider.with_base_url(base_url.clone());
    }

    let config = TrainingConfig {
        ticker: args.ticker.to_uppercase(),
        start: args.start,
        end: args.end,
        train_split: args.train_split,
        window_size: WINDOW_SIZE,
        model: LstmConfig::default()
            .with_epochs(args.epochs)
            .with_batch_size(args.batch_size)
            .with_learning_rate(args.learning_rate)
            .with_seed(args.seed),
        artifacts: ArtifactPaths {
            model_path: args.model_path,
            scaler_path: args.scaler_path,
        },
        prices_csv: args.prices_csv,
    };

    info!("🚀 Starting training run for {}", config.ticker);
    let report = run_training(&provider, &config)
        .await
        .context("training failed")?;

    info!(
        "Run {}: {} observations, {} train / {} test sequences, final loss {:.6}",
        report.training_run_id,
        report.observations,
        report.train_samples,
        report.test_samples,
        report.loss_history.last().copied().unwrap_or(f64::NAN)
    );
    if let Some(metrics) = &report.evaluation {
        info!(
            "MAE: {:.4} | RMSE: {:.4} | MAPE: {:.2}%",
            metrics.mae, metrics.rmse, metrics.mape
        );
    }
    info!(
        "✅ Artifacts saved to {} and {}",
        config.artifacts.model_path.display(),
        config.artifacts.scaler_path.display()
    );

    Ok(())
}
