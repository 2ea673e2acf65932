//! Logarithmic market scoring rule cost function
//!
//! The market maker prices options off the aggregate cost
//!
//! ```text
//! C(q_buy, q_sell) = B * ln(e^(q_buy/B) + e^(q_sell/B))
//! ```
//!
//! where the counts are the outstanding buy-side and sell-side
//! positions. The liquidity parameter B bounds the maker's worst-case
//! loss per settlement period at `B * ln(2)`.

use serde::{Deserialize, Serialize};

use crate::types::Side;

/// LMSR pricing parameters. `b` must be positive; validated by the
/// engine at construction time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LmsrCost {
    /// Liquidity parameter
    pub b: f64,
    /// Lower bound of the quoted price range
    pub min_price: f64,
    /// Upper bound of the quoted price range
    pub max_price: f64,
    /// Maker cut applied on top of the remapped price
    pub spread: f64,
}

impl LmsrCost {
    pub fn new(b: f64, min_price: f64, max_price: f64, spread: f64) -> Self {
        Self { b, min_price, max_price, spread }
    }

    /// Aggregate cost of the outstanding exposure. Evaluated
    /// log-sum-exp style (max exponent factored out) so large counts
    /// do not overflow the intermediate exponentials.
    pub fn aggregate_cost(&self, buys: u64, sells: u64) -> f64 {
        let qb = buys as f64 / self.b;
        let qs = sells as f64 / self.b;
        let m = qb.max(qs);
        self.b * (m + ((qb - m).exp() + (qs - m).exp()).ln())
    }

    /// Price of the next single unit on `side`: the cost delta with
    /// only the requesting side's count incremented. Lies in (0, 1).
    ///
    /// At equal counts both sides price identically, slightly above
    /// 0.5 - the unit being bought moves the market against itself,
    /// which is the maker spread baked into the delta form.
    pub fn marginal_price(&self, buys: u64, sells: u64, side: Side) -> f64 {
        let base = self.aggregate_cost(buys, sells);
        let bumped = match side {
            Side::Buy => self.aggregate_cost(buys + 1, sells),
            Side::Sell => self.aggregate_cost(buys, sells + 1),
        };
        bumped - base
    }

    /// Marginal price remapped into `[min_price, max_price]`; this is
    /// the price quoted to users and used to compute stake consumption.
    /// Never clamped: callers check the bounds and treat an excursion
    /// as a fatal invariant violation.
    pub fn scaled_price(&self, buys: u64, sells: u64, side: Side) -> f64 {
        let range = self.max_price - self.min_price;
        (1.0 + self.spread) * self.marginal_price(buys, sells, side) * range + self.min_price
    }
}
