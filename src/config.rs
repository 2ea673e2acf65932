//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the market maker. Defaults mirror the production
/// deployment: a 24h settlement window, a 1000 sat stake and a
/// liquidity parameter that caps the per-window maker loss around 10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// LMSR liquidity parameter; bounds maker loss at `b_factor * ln(2)`
    pub b_factor: f64,
    /// Lower bound of the quoted price range
    pub min_price: f64,
    /// Upper bound of the quoted price range
    pub max_price: f64,
    /// Maker cut applied on top of the remapped price
    pub spread: f64,
    /// Fixed stake collected per order, in sats
    pub stake: u64,
    /// Fixed payout per winning position, in sats. Contractual - not
    /// derived from what the position actually paid.
    pub payout_amount: u64,
    /// Age after which an open position becomes eligible for settlement
    pub settlement_window_secs: u64,
    /// Bound on order-book lock acquisition; a stuck settlement run
    /// fails requests with a retryable error instead of hanging them
    pub lock_timeout_ms: u64,
    /// Dry-run settlements compute totals without paying or archiving
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            b_factor: 15.0,
            min_price: 0.001,
            max_price: 1.0,
            spread: 0.0,
            stake: 1000,
            payout_amount: 1000,
            settlement_window_secs: 24 * 3600,
            lock_timeout_ms: 500,
            dry_run: false,
        }
    }
}

impl EngineConfig {
    pub fn settlement_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.settlement_window_secs as i64)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
