//! In-memory ledger backend.
//!
//! Stores transfers and scan checkpoints in RAM behind a single mutex.
//! Useful for tests and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use transferindex_core::checkpoint::{CheckpointStore, MemoryCheckpointStore, ScanCheckpoint};
use transferindex_core::error::IndexerError;
use transferindex_core::ledger::{newest_first, InsertOutcome, LedgerStore};
use transferindex_core::types::{StoredTransfer, Transfer};

#[derive(Default)]
struct Rows {
    rows: Vec<StoredTransfer>,
    keys: HashSet<(String, u64)>,
    next_id: i64,
}

/// In-memory ledger.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: Mutex<Rows>,
    checkpoints: MemoryCheckpointStore,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<MutexGuard<'_, Rows>, IndexerError> {
        self.inner
            .lock()
            .map_err(|_| IndexerError::Storage("ledger lock poisoned".into()))
    }

    fn page<F>(&self, limit: u64, offset: u64, keep: F) -> Result<Vec<StoredTransfer>, IndexerError>
    where
        F: Fn(&Transfer) -> bool,
    {
        let rows = self.rows()?;
        let mut matching: Vec<&StoredTransfer> =
            rows.rows.iter().filter(|r| keep(&r.transfer)).collect();
        matching.sort_by(|a, b| newest_first(&a.transfer, &b.transfer));
        Ok(matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert(&self, transfer: &Transfer) -> Result<InsertOutcome, IndexerError> {
        let mut rows = self.rows()?;
        let key = (transfer.transaction_hash.to_ascii_lowercase(), transfer.log_index);
        if !rows.keys.insert(key) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.next_id += 1;
        let mut canonical = transfer.clone();
        canonical.transaction_hash = canonical.transaction_hash.to_ascii_lowercase();
        canonical.from = canonical.from.to_ascii_lowercase();
        canonical.to = canonical.to.to_ascii_lowercase();
        canonical.token_address = canonical.token_address.to_ascii_lowercase();
        let stored = StoredTransfer {
            id: rows.next_id,
            transfer: canonical,
            created_at: Utc::now(),
        };
        rows.rows.push(stored);
        Ok(InsertOutcome::Inserted)
    }

    async fn query_by_address(
        &self,
        address: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<StoredTransfer>, IndexerError> {
        let address = address.to_ascii_lowercase();
        self.page(limit, offset, |t| t.involves(&address))
    }

    async fn count_by_address(&self, address: &str) -> Result<u64, IndexerError> {
        let address = address.to_ascii_lowercase();
        let rows = self.rows()?;
        Ok(rows.rows.iter().filter(|r| r.transfer.involves(&address)).count() as u64)
    }

    async fn query_all(&self, limit: u64, offset: u64) -> Result<Vec<StoredTransfer>, IndexerError> {
        self.page(limit, offset, |_| true)
    }

    async fn count_all(&self) -> Result<u64, IndexerError> {
        Ok(self.rows()?.rows.len() as u64)
    }

    async fn high_water_mark(&self) -> Result<u64, IndexerError> {
        let rows = self.rows()?;
        Ok(rows
            .rows
            .iter()
            .map(|r| r.transfer.block_number)
            .max()
            .unwrap_or(0))
    }
}

#[async_trait]
impl CheckpointStore for InMemoryLedger {
    async fn load_checkpoint(
        &self,
        token_address: &str,
    ) -> Result<Option<ScanCheckpoint>, IndexerError> {
        self.checkpoints.load_checkpoint(token_address).await
    }

    async fn save_checkpoint(&self, checkpoint: ScanCheckpoint) -> Result<(), IndexerError> {
        self.checkpoints.save_checkpoint(checkpoint).await
    }

    async fn delete_checkpoint(&self, token_address: &str) -> Result<(), IndexerError> {
        self.checkpoints.delete_checkpoint(token_address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(tx: u8, block: u64, tx_index: u64, log_index: u64) -> Transfer {
        Transfer {
            transaction_hash: format!("0x{}", format!("{tx:02x}").repeat(32)),
            block_number: block,
            block_timestamp: 1_700_000_000 + block,
            from: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
            to: "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".into(),
            value: "1000".into(),
            token_address: "0xcccccccccccccccccccccccccccccccccccccccc".into(),
            log_index,
            transaction_index: tx_index,
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_noop() {
        let ledger = InMemoryLedger::new();
        let t = transfer(1, 10, 0, 0);
        assert_eq!(ledger.insert(&t).await.unwrap(), InsertOutcome::Inserted);

        let mut again = t.clone();
        again.value = "999".into(); // non-key field differs
        assert_eq!(ledger.insert(&again).await.unwrap(), InsertOutcome::Duplicate);

        assert_eq!(ledger.count_all().await.unwrap(), 1);
        let rows = ledger.query_all(10, 0).await.unwrap();
        assert_eq!(rows[0].transfer.value, "1000");
    }

    #[tokio::test]
    async fn newest_first_with_tie_breaks() {
        let ledger = InMemoryLedger::new();
        ledger.insert(&transfer(1, 9, 5, 0)).await.unwrap();
        ledger.insert(&transfer(2, 10, 0, 0)).await.unwrap();
        ledger.insert(&transfer(2, 10, 0, 1)).await.unwrap();

        let rows = ledger
            .query_by_address("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", 10, 0)
            .await
            .unwrap();
        let order: Vec<_> = rows
            .iter()
            .map(|r| (r.transfer.block_number, r.transfer.log_index))
            .collect();
        assert_eq!(order, vec![(10, 1), (10, 0), (9, 0)]);
    }

    #[tokio::test]
    async fn ids_follow_insertion_order() {
        let ledger = InMemoryLedger::new();
        ledger.insert(&transfer(1, 50, 0, 0)).await.unwrap();
        ledger.insert(&transfer(2, 10, 0, 0)).await.unwrap();
        let rows = ledger.query_all(10, 0).await.unwrap();
        assert_eq!(rows[0].id, 1); // block 50, inserted first
        assert_eq!(rows[1].id, 2);
    }

    #[tokio::test]
    async fn high_water_mark_and_pagination() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.high_water_mark().await.unwrap(), 0);

        for i in 0..25u8 {
            ledger.insert(&transfer(i, 100 + i as u64, 0, 0)).await.unwrap();
        }
        assert_eq!(ledger.high_water_mark().await.unwrap(), 124);
        assert_eq!(
            ledger
                .count_by_address("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
                .await
                .unwrap(),
            25
        );

        let page = ledger.query_all(10, 20).await.unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page[0].transfer.block_number, 104);
        assert!(ledger
            .query_by_address("0x0000000000000000000000000000000000000000", 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn checkpoints_are_delegated() {
        let ledger = InMemoryLedger::new();
        ledger
            .save_checkpoint(ScanCheckpoint::new("0xcccccccccccccccccccccccccccccccccccccccc", 77))
            .await
            .unwrap();
        let cp = ledger
            .load_checkpoint("0xCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cp.scanned_through(), Some(77));
    }
}
