//! Live watcher: ingests log batches pushed by a subscription.
//!
//! When the subscription fails (subscribe error, error item, or the stream
//! ending) the watcher resubscribes with exponential backoff. The backoff
//! resets after every successful subscribe.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use transferindex_core::config::IndexerConfig;
use transferindex_core::ledger::Ledger;
use transferindex_core::retry::{RetryConfig, RetryPolicy};
use transferindex_core::source::{LogFilter, LogSource};

use crate::ingest::Ingestor;

pub struct LiveWatcher {
    filter: LogFilter,
    source: Arc<dyn LogSource>,
    ingestor: Ingestor,
    backoff: RetryPolicy,
    cancel: CancellationToken,
}

impl LiveWatcher {
    pub fn new(
        config: &IndexerConfig,
        source: Arc<dyn LogSource>,
        ledger: Arc<dyn Ledger>,
        cancel: CancellationToken,
    ) -> Self {
        let backoff = RetryPolicy::new(RetryConfig::unbounded(
            Duration::from_millis(config.resubscribe_initial_ms),
            Duration::from_millis(config.resubscribe_max_ms),
        ));
        Self {
            filter: config.log_filter(),
            ingestor: Ingestor::new(Arc::clone(&source), ledger),
            source,
            backoff,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(&self) {
        let mut failures = 0u32;

        loop {
            let subscribed = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = self.source.subscribe_logs(&self.filter) => r,
            };

            match subscribed {
                Ok(mut stream) => {
                    failures = 0;
                    info!(address = %self.filter.address, "live subscription established");
                    loop {
                        let item = tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            item = stream.next() => item,
                        };
                        match item {
                            Some(Ok(logs)) => {
                                let stats = self.ingestor.ingest(&logs).await;
                                debug!(
                                    logs = logs.len(),
                                    inserted = stats.inserted,
                                    duplicates = stats.duplicates,
                                    "live batch ingested"
                                );
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "live subscription failed");
                                break;
                            }
                            None => {
                                warn!("live subscription ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "subscribe failed"),
            }

            failures = failures.saturating_add(1);
            let delay = self
                .backoff
                .next_delay(failures)
                .unwrap_or(self.backoff.config.max_backoff);
            info!(attempt = failures, delay_ms = delay.as_millis() as u64, "resubscribing");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("live watcher stopped");
    }
}
