//! Indexer supervisor: owns the lifecycle of one ingestion pipeline.
//!
//! `start()` validates the configuration, runs one backfill pass, then
//! spawns the live watcher and the reconciliation timer. `stop()` cancels
//! both, aborts their tasks and closes the ledger. A stopped indexer cannot
//! be restarted; build a new one.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use transferindex_core::config::{IndexerConfig, IndexerState};
use transferindex_core::error::IndexerError;
use transferindex_core::ledger::Ledger;
use transferindex_core::source::LogSource;

use crate::backfill::{BackfillScanner, ScanReport};
use crate::reconcile::ReconciliationTimer;
use crate::watcher::LiveWatcher;

pub struct Indexer {
    config: IndexerConfig,
    source: Arc<dyn LogSource>,
    ledger: Arc<dyn Ledger>,
    state: watch::Sender<IndexerState>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Indexer {
    pub fn new(config: IndexerConfig, source: Arc<dyn LogSource>, ledger: Arc<dyn Ledger>) -> Self {
        let (state, _) = watch::channel(IndexerState::Idle);
        Self {
            config,
            source,
            ledger,
            state,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<IndexerState> {
        self.state.subscribe()
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        Arc::clone(&self.ledger)
    }

    /// Validate, backfill, then go live.
    ///
    /// Returns the initial backfill report, or `None` if that pass failed
    /// (the failure is logged; the watcher and timer start anyway).
    pub async fn start(&self) -> Result<Option<ScanReport>, IndexerError> {
        self.config.validate()?;

        let claimed = self.state.send_if_modified(|s| {
            if *s == IndexerState::Idle {
                *s = IndexerState::Backfilling;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(IndexerError::Other(format!(
                "indexer cannot start from state '{}'",
                self.state()
            )));
        }

        info!(token = %self.config.token(), "starting indexer");

        let scanner = Arc::new(BackfillScanner::new(
            self.config.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.ledger),
            self.cancel.clone(),
        ));

        let report = match scanner.scan().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "initial backfill failed");
                None
            }
        };

        if self.cancel.is_cancelled() {
            info!("indexer stopped during initial backfill");
            return Ok(report);
        }

        let watcher = LiveWatcher::new(
            &self.config,
            Arc::clone(&self.source),
            Arc::clone(&self.ledger),
            self.cancel.clone(),
        );
        let timer = ReconciliationTimer::new(
            scanner,
            self.config.reconcile_interval(),
            self.cancel.clone(),
        );

        {
            let mut tasks = self.tasks.lock().await;
            tasks.push(tokio::spawn(async move { watcher.run().await }));
            tasks.push(tokio::spawn(async move { timer.run().await }));
        }

        self.state.send_if_modified(|s| {
            if *s == IndexerState::Backfilling {
                *s = IndexerState::Live;
                true
            } else {
                false
            }
        });
        info!("indexer live");
        Ok(report)
    }

    /// Stop all tasks and close the ledger. Safe to call more than once.
    pub async fn stop(&self) -> Result<(), IndexerError> {
        if matches!(self.state(), IndexerState::Stopping | IndexerState::Stopped) {
            return Ok(());
        }
        self.state.send_replace(IndexerState::Stopping);
        info!("stopping indexer");

        self.cancel.cancel();
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }

        let closed = self.ledger.close().await;
        if let Err(e) = &closed {
            warn!(error = %e, "failed to close ledger");
        }
        self.state.send_replace(IndexerState::Stopped);
        info!("indexer stopped");
        closed
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
