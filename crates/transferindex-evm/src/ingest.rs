//! Shared per-batch ingestion: raw log → block timestamp → normalize → ledger.
//!
//! Used by both the backfill scanner and the live watcher. Every record is
//! handled independently; one bad log never stops its siblings.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use transferindex_core::ledger::{InsertOutcome, Ledger};
use transferindex_core::normalizer::normalize;
use transferindex_core::source::LogSource;
use transferindex_core::types::RawLog;

/// Per-record outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// New rows written.
    pub inserted: u64,
    /// Already present; no-op.
    pub duplicates: u64,
    /// Logs that can never become a transfer (malformed, wrong event).
    pub rejected: u64,
    /// Logs dropped because a timestamp lookup or a store write failed.
    pub failed: u64,
    /// Logs flagged `removed` by the node.
    pub removed: u64,
}

impl IngestStats {
    pub fn merge(&mut self, other: IngestStats) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.removed += other.removed;
    }

    /// `true` when no record was lost to a transient failure.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Turns raw log batches into ledger rows.
#[derive(Clone)]
pub struct Ingestor {
    source: Arc<dyn LogSource>,
    ledger: Arc<dyn Ledger>,
}

impl Ingestor {
    pub fn new(source: Arc<dyn LogSource>, ledger: Arc<dyn Ledger>) -> Self {
        Self { source, ledger }
    }

    /// Ingest `logs` sequentially, in the order given.
    pub async fn ingest(&self, logs: &[RawLog]) -> IngestStats {
        let mut stats = IngestStats::default();
        // block number -> timestamp, or None if the lookup already failed
        let mut timestamps: HashMap<u64, Option<u64>> = HashMap::new();

        for log in logs {
            if log.removed {
                stats.removed += 1;
                continue;
            }

            let timestamp = match timestamps.entry(log.block_number) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    let ts = match self.source.get_block(log.block_number).await {
                        Ok(header) => Some(header.timestamp),
                        Err(err) => {
                            warn!(block = log.block_number, error = %err, "block timestamp lookup failed");
                            None
                        }
                    };
                    *e.insert(ts)
                }
            };
            let Some(timestamp) = timestamp else {
                warn!(
                    tx = %log.transaction_hash,
                    log_index = log.log_index,
                    "dropping transfer without block timestamp"
                );
                stats.failed += 1;
                continue;
            };

            let transfer = match normalize(log, timestamp) {
                Ok(t) => t,
                Err(err) => {
                    warn!(
                        tx = %log.transaction_hash,
                        log_index = log.log_index,
                        error = %err,
                        "rejecting malformed log"
                    );
                    stats.rejected += 1;
                    continue;
                }
            };

            match self.ledger.insert(&transfer).await {
                Ok(InsertOutcome::Inserted) => stats.inserted += 1,
                Ok(InsertOutcome::Duplicate) => stats.duplicates += 1,
                Err(err) => {
                    warn!(
                        tx = %transfer.transaction_hash,
                        log_index = transfer.log_index,
                        error = %err,
                        "failed to store transfer"
                    );
                    stats.failed += 1;
                }
            }
        }

        debug!(
            logs = logs.len(),
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            failed = stats.failed,
            "batch ingested"
        );
        stats
    }
}
