use std::sync::Arc;

use tokio::net::TcpListener;

use stock_lstm_api::app;
use stock_lstm_api::config::ServiceConfig;
use stock_lstm_api::external::price_provider::PriceProvider;
use stock_lstm_api::external::yahoofinance::YahooFinanceProvider;
use stock_lstm_api::logging::{init_logging, LoggingConfig};
use stock_lstm_api::services::artifact_service::load_model_status;
use stock_lstm_api::services::windowing::WINDOW_SIZE;
use stock_lstm_api::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env())?;

    let config = ServiceConfig::from_env()?;

    // Artifacts are resolved before the listener accepts traffic
    let model_status = load_model_status(&config.artifacts, WINDOW_SIZE);

    let mut yahoo = YahooFinanceProvider::new(config.provider_timeout)?;
    if let Some(base_url) = &config.provider_base_url {
        tracing::info!("📊 Using market data endpoint {}", base_url);
        yahoo = yahoo.with_base_url(base_url.clone());
    }
    let provider: Arc<dyn PriceProvider> = Arc::new(yahoo);

    let state = AppState::new(model_status, provider, config.auto_lookback_days);
    let app = app::create_app(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("🚀 Stock LSTM API running at http://{}/", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
