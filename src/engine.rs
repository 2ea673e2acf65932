//! Engine context - the one shared object tying the cost function,
//! order book and store together
//!
//! Built once at process start and passed by `Arc` into the HTTP
//! layer, the settlement engine and the scheduler; there are no
//! ambient singletons. The order book sits behind a single mutex with
//! bounded acquisition so a stuck settlement run cannot starve request
//! handlers - callers get a retryable `Busy` instead of hanging.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::cost::LmsrCost;
use crate::orderbook::{MarketState, OrderBook};
use crate::store::{PositionStore, StoreError};
use crate::types::{Position, Side, StatusFilter};

#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad request input; nothing was mutated
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Internal pricing invariant violation - aborted rather than
    /// returning a plausible-looking wrong price
    #[error("pricing invariant violated: {0}")]
    Numeric(String),

    /// The external quote source could not produce a usable rate
    #[error("quote unavailable: {0}")]
    QuoteUnavailable(String),

    /// Order-book lock acquisition timed out; safe to retry
    #[error("order book busy, retry later")]
    Busy,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Transient failures the caller may retry. Everything else is
    /// either a caller bug or an internal fault.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy | EngineError::QuoteUnavailable(_))
    }
}

pub struct Engine {
    config: EngineConfig,
    book: Mutex<OrderBook>,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<dyn PositionStore>) -> Result<Self, EngineError> {
        validate(&config)?;
        let cost = LmsrCost::new(config.b_factor, config.min_price, config.max_price, config.spread);
        let book = OrderBook::new(cost, store)?;
        Ok(Self { config, book: Mutex::new(book) })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock_book(&self) -> Result<MutexGuard<'_, OrderBook>, EngineError> {
        self.book
            .try_lock_for(self.config.lock_timeout())
            .ok_or(EngineError::Busy)
    }

    /// Live quote for the next unit on `side`. Reads under the same
    /// lock as mutations so a price can never be served from a state
    /// it was not computed against.
    pub fn quote(&self, side: Side) -> Result<f64, EngineError> {
        self.lock_book()?.quote(side)
    }

    /// Price and persist a new position; returns it with the change
    /// owed back to the buyer. Serialized with respect to all other
    /// mutations - concurrent orders each see the count their price
    /// was computed from.
    pub fn place_order(
        &self,
        side: Side,
        stake: u64,
        payout_address: &str,
        reference_price: f64,
    ) -> Result<(Position, u64), EngineError> {
        self.lock_book()?.place_order(side, stake, payout_address, reference_price)
    }

    pub fn dump_book(&self, filter: StatusFilter) -> Result<Vec<Position>, EngineError> {
        self.lock_book()?.dump(filter)
    }

    pub fn oldest_open_created_at(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        self.lock_book()?.oldest_open_created_at()
    }

    pub fn market_state(&self) -> Result<MarketState, EngineError> {
        Ok(self.lock_book()?.market_state())
    }

    /// Settlement-only: open positions at or past the window cutoff
    pub(crate) fn expired_open(&self, cutoff: DateTime<Utc>) -> Result<Vec<Position>, EngineError> {
        self.lock_book()?.expired_open(cutoff)
    }

    /// Settlement-only: archive one settled position
    pub(crate) fn archive(&self, position: &Position) -> Result<bool, EngineError> {
        self.lock_book()?.archive(position)
    }
}

fn validate(config: &EngineConfig) -> Result<(), EngineError> {
    if !config.b_factor.is_finite() || config.b_factor <= 0.0 {
        return Err(EngineError::Config(format!(
            "liquidity parameter must be positive, got {}",
            config.b_factor
        )));
    }
    if !config.min_price.is_finite() || !config.max_price.is_finite() || config.min_price < 0.0 {
        return Err(EngineError::Config("price bounds must be finite and non-negative".into()));
    }
    if config.min_price >= config.max_price {
        return Err(EngineError::Config(format!(
            "min price {} must be below max price {}",
            config.min_price, config.max_price
        )));
    }
    if config.max_price > 1.0 {
        // quoted prices are fractions of the stake
        return Err(EngineError::Config(format!(
            "max price {} must not exceed 1.0",
            config.max_price
        )));
    }
    if config.spread < 0.0 {
        return Err(EngineError::Config(format!("spread {} must be non-negative", config.spread)));
    }
    if config.stake == 0 || config.payout_amount == 0 {
        return Err(EngineError::Config("stake and payout amount must be positive".into()));
    }
    Ok(())
}
