//! Core types for the up/down option market

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(pub Uuid);

impl PositionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way the buyer bets the reference price moves.
/// A Buy wins if the price resolves above the reference rate,
/// a Sell wins if it resolves below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Position lifecycle status. Archived is terminal: a position settles
/// exactly once and is never deleted afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Archived,
}

/// Filter for book dumps and store scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Open,
    Archived,
}

/// A single user's directional stake on the next settlement window.
/// Immutable once created except for the Open -> Archived transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub side: Side,
    /// Where winnings are sent
    pub payout_address: String,
    /// BTC-USD rate recorded at purchase time; the resolution price is
    /// compared against this at settlement
    pub reference_price: f64,
    /// Stake actually consumed after change was returned, in sats
    pub price_paid: u64,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
}

impl Position {
    /// Create a fresh open position stamped with the current time
    pub fn open(side: Side, payout_address: &str, reference_price: f64, price_paid: u64) -> Self {
        Self {
            id: PositionId::new(),
            side,
            payout_address: payout_address.to_string(),
            reference_price,
            price_paid,
            status: PositionStatus::Open,
            created_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// A payout owed to a winning position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutInstruction {
    pub position_id: PositionId,
    pub payout_address: String,
    pub amount: u64,
}

/// A winner whose payout could not be dispatched; the position stays
/// open and is retried on the next settlement cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPayout {
    pub position_id: PositionId,
    pub payout_address: String,
    pub error: String,
}

/// Result of one settlement run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    pub resolution_price: f64,
    /// Positions selected for this run (winners and losers)
    pub processed: usize,
    /// Winning payouts in dispatch order (oldest position first)
    pub winners: Vec<PayoutInstruction>,
    pub total_payout: u64,
    pub archived: usize,
    pub failed: Vec<FailedPayout>,
    pub dry_run: bool,
}

/// Outcome of asking the settlement engine to run
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Completed(SettlementReport),
    /// A prior run was still in flight; this tick was deliberately
    /// skipped rather than double-selecting the same positions
    Skipped,
}
