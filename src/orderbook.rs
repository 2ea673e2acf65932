//! The order book for the single up/down market
//!
//! Derives live quotes from outstanding exposure via the LMSR cost
//! function and owns the append path to the position store. The
//! buy/sell counts are a cached view of the open positions in the
//! store, rebuilt on construction and maintained incrementally.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cost::LmsrCost;
use crate::engine::EngineError;
use crate::store::PositionStore;
use crate::types::{Position, Side, StatusFilter};

/// Open exposure per side. Always equals the count of open positions
/// with the corresponding side in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketState {
    pub open_buys: u64,
    pub open_sells: u64,
}

impl MarketState {
    pub fn count(&self, side: Side) -> u64 {
        match side {
            Side::Buy => self.open_buys,
            Side::Sell => self.open_sells,
        }
    }

    fn increment(&mut self, side: Side) {
        match side {
            Side::Buy => self.open_buys += 1,
            Side::Sell => self.open_sells += 1,
        }
    }

    fn decrement(&mut self, side: Side) {
        match side {
            Side::Buy => self.open_buys = self.open_buys.saturating_sub(1),
            Side::Sell => self.open_sells = self.open_sells.saturating_sub(1),
        }
    }
}

pub struct OrderBook {
    store: Arc<dyn PositionStore>,
    cost: LmsrCost,
    state: MarketState,
}

impl OrderBook {
    /// Build the book over an existing store, rebuilding the cached
    /// exposure counts from the open positions it already holds.
    pub fn new(cost: LmsrCost, store: Arc<dyn PositionStore>) -> Result<Self, EngineError> {
        let (open_buys, open_sells) = store.open_counts()?;
        Ok(Self {
            store,
            cost,
            state: MarketState { open_buys, open_sells },
        })
    }

    pub fn market_state(&self) -> MarketState {
        self.state
    }

    /// Price quoted for the next unit on `side`, against the current
    /// exposure. A non-finite or out-of-range value is a fatal pricing
    /// invariant violation, never clamped into range.
    pub fn quote(&self, side: Side) -> Result<f64, EngineError> {
        let price = self
            .cost
            .scaled_price(self.state.open_buys, self.state.open_sells, side);
        if !price.is_finite() || price < self.cost.min_price || price > self.cost.max_price {
            return Err(EngineError::Numeric(format!(
                "quote {} escaped [{}, {}] at {} buys / {} sells",
                price, self.cost.min_price, self.cost.max_price, self.state.open_buys, self.state.open_sells
            )));
        }
        Ok(price)
    }

    /// Price the order, persist it and return it along with the change
    /// owed back to the buyer. The consumed stake is
    /// `round(quote * stake)`, rounding half away from zero.
    pub fn place_order(
        &mut self,
        side: Side,
        stake: u64,
        payout_address: &str,
        reference_price: f64,
    ) -> Result<(Position, u64), EngineError> {
        if stake == 0 {
            return Err(EngineError::InvalidOrder("stake must be positive".into()));
        }
        if payout_address.trim().is_empty() {
            return Err(EngineError::InvalidOrder("payout address is required".into()));
        }
        if !reference_price.is_finite() || reference_price <= 0.0 {
            return Err(EngineError::InvalidOrder(format!(
                "reference price {} is not usable",
                reference_price
            )));
        }

        let price = self.quote(side)?;
        let consumed = consumed_stake(price, stake);
        if consumed > stake {
            // price <= max_price <= 1.0 makes this unreachable; if it
            // fires, the pricing invariant is broken
            return Err(EngineError::Numeric(format!(
                "consumed {} exceeds stake {} at price {}",
                consumed, stake, price
            )));
        }

        let position = Position::open(side, payout_address, reference_price, consumed);
        self.store.insert(&position)?;
        self.state.increment(side);

        Ok((position, stake - consumed))
    }

    /// Creation-time-ordered snapshot of the book, optionally filtered
    /// by status. Finite and restartable - not a live cursor.
    pub fn dump(&self, filter: StatusFilter) -> Result<Vec<Position>, EngineError> {
        Ok(self.store.scan(filter)?)
    }

    pub fn oldest_open_created_at(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        Ok(self.store.oldest_open_created_at()?)
    }

    /// Open positions created at or before `cutoff`, oldest first.
    /// Settlement-only access path.
    pub(crate) fn expired_open(&self, cutoff: DateTime<Utc>) -> Result<Vec<Position>, EngineError> {
        Ok(self.store.open_created_before(cutoff)?)
    }

    /// Archive a settled position and release its exposure. Returns
    /// false if the position was already archived. Settlement-only.
    pub(crate) fn archive(&mut self, position: &Position) -> Result<bool, EngineError> {
        let archived = self.store.archive(position.id)?;
        if archived {
            self.state.decrement(position.side);
        }
        Ok(archived)
    }
}

/// Portion of the stake consumed at `price`, rounded half away from
/// zero (both operands are positive, so halves round up).
fn consumed_stake(price: f64, stake: u64) -> u64 {
    (price * stake as f64).round() as u64
}
