//! Reconciliation timer: re-runs the backfill pass on a fixed interval to
//! pick up anything the live subscription missed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backfill::BackfillScanner;

pub struct ReconciliationTimer {
    scanner: Arc<BackfillScanner>,
    interval: Duration,
    cancel: CancellationToken,
}

impl ReconciliationTimer {
    pub fn new(scanner: Arc<BackfillScanner>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            scanner,
            interval,
            cancel,
        }
    }

    /// Run until cancelled. The first pass happens one interval after start.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.scanner.scan().await {
                Ok(report) if report.range.is_empty() => {
                    debug!("reconciliation: nothing new");
                }
                Ok(report) => info!(
                    from = report.range.from,
                    to = report.range.to,
                    inserted = report.stats.inserted,
                    failed_batches = report.failed_ranges.len(),
                    "reconciliation pass finished"
                ),
                Err(e) => error!(error = %e, "reconciliation pass failed"),
            }
        }

        debug!("reconciliation timer stopped");
    }
}
