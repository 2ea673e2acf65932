//! HTTP handlers - a thin layer over the engine
//!
//! No business logic lives here: handlers validate the wire shape,
//! call into the engine and map errors onto status codes.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::{Engine, EngineError};
use crate::price_feed::QuoteSource;
use crate::settlement::SettlementEngine;
use crate::types::{Position, SettlementOutcome, SettlementReport, Side, StatusFilter};

/// Shared service state handed to every handler
pub struct AppState {
    pub engine: Arc<Engine>,
    pub settlement: Arc<SettlementEngine>,
    pub quotes: Arc<dyn QuoteSource>,
}

/// Uniform response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data: Some(data), error: None })
    }

    pub fn err(message: impl Into<String>) -> Json<Self> {
        Json(Self { success: false, data: None, error: Some(message.into()) })
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn engine_error(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
        EngineError::Busy | EngineError::QuoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Numeric(_) | EngineError::Store(_) | EngineError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, ApiResponse::err(e.to_string()))
}

async fn live_rate(state: &AppState) -> Result<f64, ApiError> {
    state
        .quotes
        .current_rate()
        .await
        .map_err(|e| engine_error(EngineError::QuoteUnavailable(e.to_string())))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/btc_quote", get(btc_quote))
        .route("/quote", get(price_quote))
        .route("/buy", post(buy))
        .route("/book", get(show_book))
        .route("/settle", post(settle))
        .with_state(state)
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /btc_quote - current BTC-USD reference rate
async fn btc_quote(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<f64>>, ApiError> {
    let rate = live_rate(&state).await?;
    Ok(ApiResponse::ok(rate))
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub btc_usd: f64,
    pub buy: f64,
    pub sell: f64,
}

/// GET /quote - the rate plus both option prices
async fn price_quote(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<QuoteResponse>>, ApiError> {
    let btc_usd = live_rate(&state).await?;
    let buy = state.engine.quote(Side::Buy).map_err(engine_error)?;
    let sell = state.engine.quote(Side::Sell).map_err(engine_error)?;
    Ok(ApiResponse::ok(QuoteResponse { btc_usd, buy, sell }))
}

/// Price direction the buyer bets on
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Up,
    Down,
}

impl From<Action> for Side {
    fn from(action: Action) -> Self {
        match action {
            Action::Up => Side::Buy,
            Action::Down => Side::Sell,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BuyRequest {
    pub action: Action,
    pub payout_address: String,
}

#[derive(Debug, Serialize)]
pub struct BuyResponse {
    pub position_id: String,
    pub side: Side,
    pub btc_usd: f64,
    pub paid: u64,
    pub change: u64,
}

/// POST /buy - purchase one option at the fixed stake; the unconsumed
/// remainder is returned to the buyer as change
async fn buy(
    State(state): State<Arc<AppState>>,
    Json(input): Json<BuyRequest>,
) -> Result<Json<ApiResponse<BuyResponse>>, ApiError> {
    let rate = live_rate(&state).await?;
    let stake = state.engine.config().stake;

    let (position, change) = state
        .engine
        .place_order(input.action.into(), stake, &input.payout_address, rate)
        .map_err(engine_error)?;

    Ok(ApiResponse::ok(BuyResponse {
        position_id: position.id.to_string(),
        side: position.side,
        btc_usd: rate,
        paid: position.price_paid,
        change,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct BookQuery {
    #[serde(default)]
    pub status: StatusFilter,
}

/// GET /book?status=open|archived - creation-ordered dump
async fn show_book(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookQuery>,
) -> Result<Json<ApiResponse<Vec<Position>>>, ApiError> {
    let positions = state.engine.dump_book(query.status).map_err(engine_error)?;
    Ok(ApiResponse::ok(positions))
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    /// Resolution price override; fetched live when absent
    pub resolution_price: Option<f64>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SettleResponse {
    Report(SettlementReport),
    Skipped { skipped: bool },
}

/// POST /settle - administrative settlement trigger
async fn settle(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SettleRequest>,
) -> Result<Json<ApiResponse<SettleResponse>>, ApiError> {
    let price = match input.resolution_price {
        Some(price) => price,
        None => live_rate(&state).await?,
    };

    let outcome = if input.dry_run {
        state.settlement.run_mock(price).await
    } else {
        state.settlement.run_settlement(price).await
    }
    .map_err(engine_error)?;

    let response = match outcome {
        SettlementOutcome::Completed(report) => SettleResponse::Report(report),
        SettlementOutcome::Skipped => SettleResponse::Skipped { skipped: true },
    };
    Ok(ApiResponse::ok(response))
}
