//! Backfill scanner: historical `[resume point, head]` scans in fixed batches.
//!
//! # Resume point
//! - `Checkpoint` strategy: the checkpoint's `next_block` when one exists,
//!   else `high_water_mark + 1` when the ledger has rows, else `genesis_block`.
//!   [`scan`](BackfillScanner::scan) persists that start as a checkpoint before
//!   touching the chain, so once a token has a checkpoint the high-water mark
//!   is never consulted again.
//! - `HighWaterMark` strategy: `high_water_mark + 1` when the ledger has rows,
//!   else `genesis_block`.
//!
//! # Per batch
//! `get_logs` → ingest every log → (checkpoint strategy) advance the
//! checkpoint to the batch end while no batch of this run has failed.
//! A failed fetch is logged and recorded; the scan moves on.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use transferindex_core::checkpoint::ScanCheckpoint;
use transferindex_core::config::{IndexerConfig, ResumeStrategy};
use transferindex_core::error::IndexerError;
use transferindex_core::ledger::Ledger;
use transferindex_core::source::{LogFilter, LogSource};
use transferindex_core::types::BlockRange;

use crate::ingest::{IngestStats, Ingestor};

/// Outcome of one backfill pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// The range this pass covered (empty when already caught up).
    pub range: BlockRange,
    /// Batches attempted.
    pub batches: u64,
    /// Batches whose `get_logs` call failed.
    pub failed_ranges: Vec<BlockRange>,
    pub stats: IngestStats,
    /// The pass stopped early because the indexer was cancelled.
    pub cancelled: bool,
}

impl ScanReport {
    fn new(range: BlockRange) -> Self {
        Self {
            range,
            batches: 0,
            failed_ranges: Vec::new(),
            stats: IngestStats::default(),
            cancelled: false,
        }
    }

    /// `true` when every batch was fetched and every record was either stored or rejected.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed_ranges.is_empty() && self.stats.is_complete()
    }
}

/// Scans historical blocks for transfers.
pub struct BackfillScanner {
    config: IndexerConfig,
    filter: LogFilter,
    source: Arc<dyn LogSource>,
    ledger: Arc<dyn Ledger>,
    ingestor: Ingestor,
    cancel: CancellationToken,
}

impl BackfillScanner {
    pub fn new(
        config: IndexerConfig,
        source: Arc<dyn LogSource>,
        ledger: Arc<dyn Ledger>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            filter: config.log_filter(),
            ingestor: Ingestor::new(Arc::clone(&source), Arc::clone(&ledger)),
            config,
            source,
            ledger,
            cancel,
        }
    }

    /// First block the next pass should scan.
    pub async fn resume_point(&self) -> Result<u64, IndexerError> {
        let token = self.config.token();

        if self.config.resume_strategy == ResumeStrategy::Checkpoint {
            if let Some(cp) = self.ledger.load_checkpoint(&token).await? {
                debug!(next_block = cp.next_block, "resuming from checkpoint");
                return Ok(cp.next_block);
            }
        }

        // An empty ledger also reports 0, so emptiness is checked explicitly.
        if self.ledger.count_all().await? > 0 {
            let hwm = self.ledger.high_water_mark().await?;
            debug!(high_water_mark = hwm, "resuming after high-water mark");
            return Ok(hwm.saturating_add(1));
        }

        Ok(self.config.genesis_block)
    }

    /// Run one pass from the resume point to the current head.
    pub async fn scan(&self) -> Result<ScanReport, IndexerError> {
        let start = self.resume_point().await?;
        if self.config.resume_strategy == ResumeStrategy::Checkpoint {
            self.anchor_checkpoint(start).await?;
        }
        let end = self.source.current_block_number().await?;
        self.scan_range(BlockRange::new(start, end)).await
    }

    /// Record `start` as the first unscanned block if no checkpoint exists yet.
    async fn anchor_checkpoint(&self, start: u64) -> Result<(), IndexerError> {
        let token = self.config.token();
        if self.ledger.load_checkpoint(&token).await?.is_none() {
            self.ledger
                .save_checkpoint(ScanCheckpoint::starting_at(&token, start))
                .await?;
            debug!(next_block = start, "scan start recorded");
        }
        Ok(())
    }

    /// Scan an explicit closed range.
    pub async fn scan_range(&self, range: BlockRange) -> Result<ScanReport, IndexerError> {
        let mut report = ScanReport::new(range);
        if range.is_empty() {
            debug!(%range, "already caught up");
            return Ok(report);
        }

        info!(from = range.from, to = range.to, "starting backfill");

        let token = self.config.token();
        let track_checkpoint = self.config.resume_strategy == ResumeStrategy::Checkpoint;
        let delay = self.config.batch_delay();
        // Set by the first incomplete batch; the checkpoint stays put for the rest of the run.
        let mut frozen = false;

        for (i, batch) in range.batches(self.config.batch_size).into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if i > 0 && !delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            report.batches += 1;
            let logs = match self.source.get_logs(&self.filter, batch.from, batch.to).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(range = %batch, error = %e, "batch fetch failed; continuing");
                    if self.config.resume_strategy == ResumeStrategy::HighWaterMark {
                        warn!(
                            range = %batch,
                            "batch will be skipped permanently once a later block is stored"
                        );
                    }
                    report.failed_ranges.push(batch);
                    frozen = true;
                    continue;
                }
            };

            let stats = self.ingestor.ingest(&logs).await;
            report.stats.merge(stats);
            debug!(range = %batch, logs = logs.len(), inserted = stats.inserted, "batch done");

            if !stats.is_complete() {
                frozen = true;
                continue;
            }
            if track_checkpoint && !frozen {
                if let Err(e) = self
                    .ledger
                    .save_checkpoint(ScanCheckpoint::new(&token, batch.to))
                    .await
                {
                    warn!(block = batch.to, error = %e, "failed to save checkpoint");
                    frozen = true;
                }
            }
        }

        info!(
            from = range.from,
            to = range.to,
            batches = report.batches,
            failed = report.failed_ranges.len(),
            inserted = report.stats.inserted,
            duplicates = report.stats.duplicates,
            cancelled = report.cancelled,
            "backfill pass finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{transfer_log, MockLogSource};
    use transferindex_core::checkpoint::CheckpointStore;
    use transferindex_core::ledger::LedgerStore;
    use transferindex_storage::InMemoryLedger;

    const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    fn config(strategy: ResumeStrategy) -> IndexerConfig {
        IndexerConfig {
            token_address: TOKEN.into(),
            batch_size: 10,
            batch_delay_ms: 0,
            resume_strategy: strategy,
            ..Default::default()
        }
    }

    fn scanner(
        cfg: IndexerConfig,
        source: &Arc<MockLogSource>,
        ledger: &Arc<InMemoryLedger>,
    ) -> BackfillScanner {
        BackfillScanner::new(cfg, source.clone(), ledger.clone(), CancellationToken::new())
    }

    #[tokio::test]
    async fn resume_point_prefers_checkpoint_then_hwm_then_genesis() {
        let source = Arc::new(MockLogSource::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let s = scanner(
            IndexerConfig { genesis_block: 50, ..config(ResumeStrategy::Checkpoint) },
            &source,
            &ledger,
        );

        assert_eq!(s.resume_point().await.unwrap(), 50);

        source.set_timestamp(100, 1);
        Ingestor::new(source.clone(), ledger.clone())
            .ingest(&[transfer_log(TOKEN, 100, 0, 1, 2, 1)])
            .await;
        assert_eq!(s.resume_point().await.unwrap(), 101);

        ledger.save_checkpoint(ScanCheckpoint::new(TOKEN, 80)).await.unwrap();
        assert_eq!(s.resume_point().await.unwrap(), 81);
    }

    #[tokio::test]
    async fn high_water_mark_strategy_ignores_checkpoint() {
        let source = Arc::new(MockLogSource::new());
        let ledger = Arc::new(InMemoryLedger::new());
        Ingestor::new(source.clone(), ledger.clone())
            .ingest(&[transfer_log(TOKEN, 100, 0, 1, 2, 1)])
            .await;
        ledger.save_checkpoint(ScanCheckpoint::new(TOKEN, 10)).await.unwrap();

        let s = scanner(config(ResumeStrategy::HighWaterMark), &source, &ledger);
        assert_eq!(s.resume_point().await.unwrap(), 101);
    }

    #[tokio::test]
    async fn block_zero_transfer_is_not_mistaken_for_empty_ledger() {
        let source = Arc::new(MockLogSource::new());
        let ledger = Arc::new(InMemoryLedger::new());
        Ingestor::new(source.clone(), ledger.clone())
            .ingest(&[transfer_log(TOKEN, 0, 0, 1, 2, 1)])
            .await;

        let s = scanner(
            IndexerConfig { genesis_block: 0, ..config(ResumeStrategy::HighWaterMark) },
            &source,
            &ledger,
        );
        assert_eq!(s.resume_point().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batches_are_contiguous_and_checkpointed() {
        let source = Arc::new(MockLogSource::new());
        let ledger = Arc::new(InMemoryLedger::new());
        source.set_head(25);
        source.add_logs([
            transfer_log(TOKEN, 3, 0, 1, 2, 1),
            transfer_log(TOKEN, 17, 0, 1, 2, 1),
            transfer_log(TOKEN, 25, 0, 1, 2, 1),
        ]);

        let report = scanner(config(ResumeStrategy::Checkpoint), &source, &ledger)
            .scan()
            .await
            .unwrap();
        assert_eq!(report.range, BlockRange::new(0, 25));
        assert_eq!(report.batches, 3);
        assert_eq!(source.get_logs_calls(), 3);
        assert_eq!(report.stats.inserted, 3);
        assert!(report.is_complete());
        assert_eq!(
            ledger.load_checkpoint(TOKEN).await.unwrap().unwrap().scanned_through(),
            Some(25)
        );
    }

    #[tokio::test]
    async fn empty_range_is_a_noop() {
        let source = Arc::new(MockLogSource::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let s = scanner(config(ResumeStrategy::Checkpoint), &source, &ledger);

        let report = s.scan_range(BlockRange::new(11, 10)).await.unwrap();
        assert_eq!(report.batches, 0);
        assert_eq!(source.get_logs_calls(), 0);
        assert_eq!(ledger.count_all().await.unwrap(), 0);
        assert!(ledger.load_checkpoint(TOKEN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_scan_issues_no_batches() {
        let source = Arc::new(MockLogSource::new());
        let ledger = Arc::new(InMemoryLedger::new());
        source.set_head(100);
        let cancel = CancellationToken::new();
        let s = BackfillScanner::new(
            config(ResumeStrategy::Checkpoint),
            source.clone(),
            ledger.clone(),
            cancel.clone(),
        );

        cancel.cancel();
        let report = s.scan().await.unwrap();
        assert!(report.cancelled);
        assert_eq!(source.get_logs_calls(), 0);
    }

    #[tokio::test]
    async fn head_lookup_failure_is_an_error() {
        let source = Arc::new(MockLogSource::new());
        let ledger = Arc::new(InMemoryLedger::new());
        source.fail_next_head_lookups(1);
        let s = scanner(
            IndexerConfig { genesis_block: 5, ..config(ResumeStrategy::Checkpoint) },
            &source,
            &ledger,
        );
        assert!(matches!(s.scan().await, Err(IndexerError::Rpc(_))));
        // the start is recorded before the chain is touched
        assert_eq!(ledger.load_checkpoint(TOKEN).await.unwrap().unwrap().next_block, 5);
    }

    #[tokio::test]
    async fn existing_checkpoint_is_not_reanchored() {
        let source = Arc::new(MockLogSource::new());
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.save_checkpoint(ScanCheckpoint::new(TOKEN, 30)).await.unwrap();
        Ingestor::new(source.clone(), ledger.clone())
            .ingest(&[transfer_log(TOKEN, 90, 0, 1, 2, 1)])
            .await;
        source.set_head(35);

        let report = scanner(config(ResumeStrategy::Checkpoint), &source, &ledger)
            .scan()
            .await
            .unwrap();
        assert_eq!(report.range, BlockRange::new(31, 35));
    }
}
