//! Payout scheduler - drives settlement on a cadence anchored to the
//! oldest open position
//!
//! Each tick sleeps until the oldest open position ages past the
//! settlement window (or a full window when the book is empty), then
//! fetches the resolution price and hands off to the settlement
//! engine. The loop owns its own lifecycle: `shutdown` interrupts the
//! sleep and joins the task without leaving a settlement half-run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::price_feed::QuoteSource;
use crate::settlement::SettlementEngine;
use crate::types::SettlementOutcome;

/// Floor on the computed sleep so an overdue book cannot busy-loop
const MIN_TICK_DELAY: Duration = Duration::from_secs(1);
/// Backoff after the quote source refuses a resolution price
const RESOLUTION_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct PayoutScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PayoutScheduler {
    pub fn spawn(
        engine: Arc<Engine>,
        settlement: Arc<SettlementEngine>,
        quotes: Arc<dyn QuoteSource>,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(engine, settlement, quotes, rx));
        Self { shutdown, handle }
    }

    /// Interrupt the sleep and wait for the loop to exit. A settlement
    /// already dispatched finishes before the task joins.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

async fn run_loop(
    engine: Arc<Engine>,
    settlement: Arc<SettlementEngine>,
    quotes: Arc<dyn QuoteSource>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "payout scheduler starting (window: {}s)",
        engine.config().settlement_window_secs
    );

    loop {
        let delay = next_delay(&engine);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                info!("payout scheduler stopping");
                return;
            }
        }

        let rate = match quotes.current_rate().await {
            Ok(rate) => rate,
            Err(e) => {
                warn!("resolution price unavailable, deferring settlement: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(RESOLUTION_RETRY_DELAY) => continue,
                    _ = shutdown.changed() => {
                        info!("payout scheduler stopping");
                        return;
                    }
                }
            }
        };

        match settlement.run_settlement(rate).await {
            Ok(SettlementOutcome::Completed(report)) => {
                if report.processed > 0 {
                    info!(
                        "scheduled settlement: {} processed, {} sats paid",
                        report.processed, report.total_payout
                    );
                }
            }
            Ok(SettlementOutcome::Skipped) => {
                info!("settlement still running, tick skipped");
            }
            Err(e) => warn!("scheduled settlement failed: {}", e),
        }
    }
}

/// Time until the oldest open position ages past the window; a full
/// window when the book is empty. Clamped below so an overdue batch
/// or a transient store error retries without spinning.
fn next_delay(engine: &Engine) -> Duration {
    let window = Duration::from_secs(engine.config().settlement_window_secs);
    match engine.oldest_open_created_at() {
        Ok(Some(oldest)) => {
            let due = oldest + engine.config().settlement_window();
            let until = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            until.max(MIN_TICK_DELAY)
        }
        Ok(None) => window.max(MIN_TICK_DELAY),
        Err(e) => {
            warn!("could not read oldest open position: {}", e);
            MIN_TICK_DELAY
        }
    }
}
