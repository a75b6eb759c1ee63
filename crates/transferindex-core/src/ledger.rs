//! The ledger storage contract.
//!
//! Implementations live in `transferindex-storage` (`InMemoryLedger`,
//! `SqliteStorage`). Every backend must honour the same rules:
//!
//! - `(transaction_hash, log_index)` is unique; re-inserting an existing key
//!   returns [`InsertOutcome::Duplicate`] and never an error.
//! - Query results are ordered `block_number DESC, transaction_index DESC,
//!   log_index DESC`.
//! - Address arguments are compared case-insensitively.
//! - A successful `insert` is durable when it returns.

use async_trait::async_trait;

use crate::checkpoint::CheckpointStore;
use crate::error::IndexerError;
use crate::types::{StoredTransfer, Transfer};

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted,
    /// The key already existed; nothing changed.
    Duplicate,
}

/// Durable, deduplicated store of [`Transfer`] records.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a record, treating an existing `(transaction_hash, log_index)` as success.
    async fn insert(&self, transfer: &Transfer) -> Result<InsertOutcome, IndexerError>;

    /// Transfers sent or received by `address`, newest first.
    async fn query_by_address(
        &self,
        address: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<StoredTransfer>, IndexerError>;

    /// Number of transfers sent or received by `address`.
    async fn count_by_address(&self, address: &str) -> Result<u64, IndexerError>;

    /// All transfers, newest first.
    async fn query_all(&self, limit: u64, offset: u64) -> Result<Vec<StoredTransfer>, IndexerError>;

    /// Total number of stored transfers.
    async fn count_all(&self) -> Result<u64, IndexerError>;

    /// `MAX(block_number)` over all rows, or 0 when the ledger is empty.
    async fn high_water_mark(&self) -> Result<u64, IndexerError>;

    /// Release the store's resources. Further calls may fail.
    async fn close(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

/// A backend that stores both transfers and scan checkpoints.
pub trait Ledger: LedgerStore + CheckpointStore {}

impl<T: LedgerStore + CheckpointStore + ?Sized> Ledger for T {}

/// Order two transfers the way every ledger query does (newest first).
pub fn newest_first(a: &Transfer, b: &Transfer) -> std::cmp::Ordering {
    (b.block_number, b.transaction_index, b.log_index).cmp(&(
        a.block_number,
        a.transaction_index,
        a.log_index,
    ))
}
