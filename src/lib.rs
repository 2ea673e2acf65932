//! LMSR automated market maker for short-horizon BTC up/down options
//!
//! Users pay a fixed stake to open a directional position; the engine
//! prices it off a logarithmic market scoring rule over the
//! outstanding exposure, returns the unconsumed stake as change, and a
//! background scheduler settles expired positions against the realized
//! price, paying winners and archiving the batch.

pub mod config;
pub mod cost;
pub mod engine;
pub mod handlers;
pub mod orderbook;
pub mod price_feed;
pub mod scheduler;
pub mod settlement;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use cost::LmsrCost;
pub use engine::{Engine, EngineError};
pub use orderbook::{MarketState, OrderBook};
pub use price_feed::{CoindeskSource, QuoteFeedError, QuoteSource};
pub use scheduler::PayoutScheduler;
pub use settlement::{DispatchError, NoopDispatcher, PayoutDispatcher, RunState, SettlementEngine};
pub use store::{PositionStore, SqliteStore, StoreError};
pub use types::*;
