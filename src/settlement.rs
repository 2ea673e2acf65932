//! Batch settlement of expired positions
//!
//! Selects open positions older than the settlement window, decides
//! win/lose against the resolution price, dispatches payouts and
//! archives the batch. Winners archive only after their payout is
//! confirmed; a failed dispatch leaves the position open so the next
//! cycle retries it, while the rest of the batch proceeds. At most one
//! run is in flight at a time - a tick landing mid-run is skipped, not
//! queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::{Engine, EngineError};
use crate::types::{
    FailedPayout, PayoutInstruction, SettlementOutcome, SettlementReport, Side,
};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("payout dispatch failed: {0}")]
    Failed(String),
}

/// External payment rail. Fallible and idempotent-unsafe: a failed
/// call is treated as if nothing left the wallet.
#[async_trait]
pub trait PayoutDispatcher: Send + Sync {
    async fn send_to(&self, address: &str, amount: u64) -> Result<(), DispatchError>;
}

/// Dispatcher that only logs. Stands in when no wallet is configured.
pub struct NoopDispatcher;

#[async_trait]
impl PayoutDispatcher for NoopDispatcher {
    async fn send_to(&self, address: &str, amount: u64) -> Result<(), DispatchError> {
        info!("payout (noop): {} sats to {}", amount, address);
        Ok(())
    }
}

/// Lifecycle of a settlement run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Committed,
    Failed,
}

pub struct SettlementEngine {
    engine: Arc<Engine>,
    dispatcher: Arc<dyn PayoutDispatcher>,
    in_flight: AtomicBool,
    last_state: Mutex<RunState>,
}

impl SettlementEngine {
    pub fn new(engine: Arc<Engine>, dispatcher: Arc<dyn PayoutDispatcher>) -> Self {
        Self {
            engine,
            dispatcher,
            in_flight: AtomicBool::new(false),
            last_state: Mutex::new(RunState::Idle),
        }
    }

    pub fn last_state(&self) -> RunState {
        *self.last_state.lock()
    }

    /// Settle everything past the window against `resolution_price`.
    /// Honors the configured dry-run flag.
    pub async fn run_settlement(&self, resolution_price: f64) -> Result<SettlementOutcome, EngineError> {
        self.run_guarded(resolution_price, self.engine.config().dry_run).await
    }

    /// Mock run: same selection and win/lose decisions, totals
    /// computed, but nothing dispatched and nothing archived.
    pub async fn run_mock(&self, resolution_price: f64) -> Result<SettlementOutcome, EngineError> {
        self.run_guarded(resolution_price, true).await
    }

    async fn run_guarded(&self, resolution_price: f64, dry_run: bool) -> Result<SettlementOutcome, EngineError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(SettlementOutcome::Skipped);
        }

        *self.last_state.lock() = RunState::Running;
        let result = self.run_inner(resolution_price, dry_run).await;
        *self.last_state.lock() = match &result {
            Ok(_) => RunState::Committed,
            Err(_) => RunState::Failed,
        };
        self.in_flight.store(false, Ordering::SeqCst);

        result.map(SettlementOutcome::Completed)
    }

    async fn run_inner(&self, resolution_price: f64, dry_run: bool) -> Result<SettlementReport, EngineError> {
        if !resolution_price.is_finite() || resolution_price <= 0.0 {
            return Err(EngineError::InvalidOrder(format!(
                "resolution price {} is not usable",
                resolution_price
            )));
        }

        let config = self.engine.config();
        let cutoff = Utc::now() - config.settlement_window();
        let batch = self.engine.expired_open(cutoff)?;
        let payout_amount = config.payout_amount;

        let mut report = SettlementReport {
            resolution_price,
            processed: batch.len(),
            winners: Vec::new(),
            total_payout: 0,
            archived: 0,
            failed: Vec::new(),
            dry_run,
        };

        for position in &batch {
            let won = wins(position.side, position.reference_price, resolution_price);

            if dry_run {
                if won {
                    report.winners.push(PayoutInstruction {
                        position_id: position.id,
                        payout_address: position.payout_address.clone(),
                        amount: payout_amount,
                    });
                    report.total_payout += payout_amount;
                }
                continue;
            }

            if won {
                // pay first, archive only on confirmed success; a
                // failure leaves the position open for the next cycle
                if let Err(e) = self.dispatcher.send_to(&position.payout_address, payout_amount).await {
                    warn!("payout to {} failed, leaving {} open: {}", position.payout_address, position.id, e);
                    report.failed.push(FailedPayout {
                        position_id: position.id,
                        payout_address: position.payout_address.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
                report.winners.push(PayoutInstruction {
                    position_id: position.id,
                    payout_address: position.payout_address.clone(),
                    amount: payout_amount,
                });
                report.total_payout += payout_amount;
            }

            match self.engine.archive(position) {
                Ok(_) => report.archived += 1,
                Err(e) => {
                    warn!("archive of {} failed: {}", position.id, e);
                    report.failed.push(FailedPayout {
                        position_id: position.id,
                        payout_address: position.payout_address.clone(),
                        error: format!("archive failed: {}", e),
                    });
                }
            }
        }

        info!(
            "settlement at {:.2}: {} processed, {} winners, {} sats paid, {} archived, {} failed{}",
            resolution_price,
            report.processed,
            report.winners.len(),
            report.total_payout,
            report.archived,
            report.failed.len(),
            if dry_run { " (dry run)" } else { "" }
        );

        Ok(report)
    }
}

/// Win rule shared by live and mock settlement: a Buy wins only if the
/// price resolved strictly above its reference rate, a Sell only if
/// strictly below. Ties lose for both sides.
fn wins(side: Side, reference_price: f64, resolution_price: f64) -> bool {
    match side {
        Side::Buy => resolution_price > reference_price,
        Side::Sell => resolution_price < reference_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::SqliteStore;
    use crate::types::StatusFilter;
    use parking_lot::Mutex as PlMutex;
    use tokio::sync::Notify;

    /// Records every dispatched payout; can be told to fail for
    /// specific addresses.
    #[derive(Default)]
    struct RecordingDispatcher {
        sent: PlMutex<Vec<(String, u64)>>,
        fail_for: PlMutex<Vec<String>>,
    }

    #[async_trait]
    impl PayoutDispatcher for RecordingDispatcher {
        async fn send_to(&self, address: &str, amount: u64) -> Result<(), DispatchError> {
            if self.fail_for.lock().iter().any(|a| a == address) {
                return Err(DispatchError::Failed("wallet offline".into()));
            }
            self.sent.lock().push((address.to_string(), amount));
            Ok(())
        }
    }

    fn instant_window_config() -> EngineConfig {
        EngineConfig { settlement_window_secs: 0, ..Default::default() }
    }

    fn harness(config: EngineConfig) -> (Arc<Engine>, Arc<RecordingDispatcher>, SettlementEngine) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = Arc::new(Engine::new(config, store).unwrap());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let settlement = SettlementEngine::new(engine.clone(), dispatcher.clone());
        (engine, dispatcher, settlement)
    }

    fn report(outcome: SettlementOutcome) -> SettlementReport {
        match outcome {
            SettlementOutcome::Completed(r) => r,
            SettlementOutcome::Skipped => panic!("run was unexpectedly skipped"),
        }
    }

    #[test]
    fn test_win_rule_is_strict() {
        assert!(wins(Side::Buy, 400.0, 450.0));
        assert!(!wins(Side::Buy, 500.0, 450.0));
        assert!(wins(Side::Sell, 500.0, 450.0));
        assert!(!wins(Side::Sell, 400.0, 450.0));
        // ties lose for both sides
        assert!(!wins(Side::Buy, 450.0, 450.0));
        assert!(!wins(Side::Sell, 450.0, 450.0));
    }

    #[tokio::test]
    async fn test_settles_winners_and_losers() {
        let (engine, dispatcher, settlement) = harness(instant_window_config());
        engine.place_order(Side::Buy, 1000, "winner", 400.0).unwrap();
        engine.place_order(Side::Buy, 1000, "loser", 500.0).unwrap();

        let r = report(settlement.run_settlement(450.0).await.unwrap());
        assert_eq!(r.processed, 2);
        assert_eq!(r.winners.len(), 1);
        assert_eq!(r.winners[0].payout_address, "winner");
        assert_eq!(r.winners[0].amount, 1000);
        assert_eq!(r.total_payout, 1000);
        assert_eq!(r.archived, 2);
        assert!(r.failed.is_empty());
        assert_eq!(settlement.last_state(), RunState::Committed);

        assert_eq!(dispatcher.sent.lock().as_slice(), &[("winner".to_string(), 1000)]);
        assert!(engine.dump_book(StatusFilter::Open).unwrap().is_empty());
        assert_eq!(engine.dump_book(StatusFilter::Archived).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_pays_nothing() {
        let (engine, dispatcher, settlement) = harness(instant_window_config());
        engine.place_order(Side::Buy, 1000, "winner", 400.0).unwrap();

        report(settlement.run_settlement(450.0).await.unwrap());
        let r = report(settlement.run_settlement(450.0).await.unwrap());

        assert_eq!(r.processed, 0);
        assert_eq!(r.total_payout, 0);
        assert_eq!(dispatcher.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_sell_wins_below_reference() {
        let (engine, dispatcher, settlement) = harness(instant_window_config());
        engine.place_order(Side::Sell, 1000, "short", 500.0).unwrap();

        let r = report(settlement.run_settlement(450.0).await.unwrap());
        assert_eq!(r.winners.len(), 1);
        assert_eq!(dispatcher.sent.lock()[0].0, "short");
    }

    #[tokio::test]
    async fn test_tie_pays_no_one() {
        let (engine, dispatcher, settlement) = harness(instant_window_config());
        engine.place_order(Side::Buy, 1000, "b", 450.0).unwrap();
        engine.place_order(Side::Sell, 1000, "s", 450.0).unwrap();

        let r = report(settlement.run_settlement(450.0).await.unwrap());
        assert_eq!(r.processed, 2);
        assert!(r.winners.is_empty());
        assert_eq!(r.archived, 2);
        assert!(dispatcher.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_dispatch_leaves_position_open_for_retry() {
        let (engine, dispatcher, settlement) = harness(instant_window_config());
        engine.place_order(Side::Buy, 1000, "broken", 400.0).unwrap();
        engine.place_order(Side::Buy, 1000, "healthy", 400.0).unwrap();
        dispatcher.fail_for.lock().push("broken".to_string());

        let r = report(settlement.run_settlement(450.0).await.unwrap());
        assert_eq!(r.processed, 2);
        assert_eq!(r.winners.len(), 1);
        assert_eq!(r.failed.len(), 1);
        assert_eq!(r.failed[0].payout_address, "broken");
        assert_eq!(r.archived, 1);

        // the broken winner is still open and retried next cycle
        let open = engine.dump_book(StatusFilter::Open).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].payout_address, "broken");

        dispatcher.fail_for.lock().clear();
        let r = report(settlement.run_settlement(450.0).await.unwrap());
        assert_eq!(r.winners.len(), 1);
        assert_eq!(r.winners[0].payout_address, "broken");
        assert!(engine.dump_book(StatusFilter::Open).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_run_archives_and_pays_nothing() {
        let (engine, dispatcher, settlement) = harness(instant_window_config());
        engine.place_order(Side::Buy, 1000, "winner", 400.0).unwrap();
        engine.place_order(Side::Buy, 1000, "loser", 500.0).unwrap();

        let r = report(settlement.run_mock(450.0).await.unwrap());
        assert!(r.dry_run);
        assert_eq!(r.processed, 2);
        assert_eq!(r.winners.len(), 1);
        assert_eq!(r.total_payout, 1000);
        assert_eq!(r.archived, 0);

        assert!(dispatcher.sent.lock().is_empty());
        assert_eq!(engine.dump_book(StatusFilter::Open).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_positions_inside_window_not_selected() {
        let (engine, _, settlement) = harness(EngineConfig {
            settlement_window_secs: 3600,
            ..Default::default()
        });
        engine.place_order(Side::Buy, 1000, "fresh", 400.0).unwrap();

        let r = report(settlement.run_settlement(450.0).await.unwrap());
        assert_eq!(r.processed, 0);
        assert_eq!(engine.dump_book(StatusFilter::Open).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_unusable_resolution_price() {
        let (_engine, _dispatcher, settlement) = harness(instant_window_config());
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                settlement.run_settlement(bad).await,
                Err(EngineError::InvalidOrder(_))
            ));
        }
        assert_eq!(settlement.last_state(), RunState::Failed);
    }

    /// Dispatcher that parks until released, holding a run in flight.
    struct ParkedDispatcher {
        release: Notify,
        entered: Notify,
    }

    #[async_trait]
    impl PayoutDispatcher for ParkedDispatcher {
        async fn send_to(&self, _address: &str, _amount: u64) -> Result<(), DispatchError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_run_is_skipped_not_doubled() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = Arc::new(Engine::new(instant_window_config(), store).unwrap());
        engine.place_order(Side::Buy, 1000, "winner", 400.0).unwrap();

        let dispatcher = Arc::new(ParkedDispatcher { release: Notify::new(), entered: Notify::new() });
        let settlement = Arc::new(SettlementEngine::new(engine.clone(), dispatcher.clone()));

        let first = {
            let settlement = settlement.clone();
            tokio::spawn(async move { settlement.run_settlement(450.0).await })
        };
        // wait until the first run is parked inside dispatch
        dispatcher.entered.notified().await;
        assert_eq!(settlement.last_state(), RunState::Running);

        let second = settlement.run_settlement(450.0).await.unwrap();
        assert!(matches!(second, SettlementOutcome::Skipped));

        dispatcher.release.notify_one();
        let r = report(first.await.unwrap().unwrap());
        assert_eq!(r.winners.len(), 1);
        assert_eq!(settlement.last_state(), RunState::Committed);
    }
}
