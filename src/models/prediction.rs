use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub historical_prices: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predicted_next_day_close_price: f64,
}

/// Response of the symbol lookup endpoint. Field names are part of the public API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoPredictionResponse {
    pub codigo_acao: String,
    pub historical_prices: Vec<f64>,
    pub predicted_next_day_close_price: f64,
    pub last_known_date: String,
    pub prediction_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
