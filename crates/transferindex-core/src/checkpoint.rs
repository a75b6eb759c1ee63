//! Scan checkpoints: how far the backfill scanner has fully scanned.
//!
//! A checkpoint is distinct from the ledger's high-water mark: the
//! high-water mark moves whenever *any* transfer is stored (including live
//! events far ahead of the scan), while the checkpoint only advances after
//! every block up to it has been scanned without failure. Resuming from the
//! checkpoint therefore never skips a range whose fetch failed.
//!
//! The stored position is the next block to scan, so a checkpoint can also
//! mark "nothing scanned yet, start here" before the first batch runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// A persisted scan position for one token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    /// Token contract (lower-case).
    pub token_address: String,
    /// Next block to scan; every block below it has been fully scanned.
    pub next_block: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl ScanCheckpoint {
    /// Every block up to and including `scanned_through` has been scanned.
    pub fn new(token_address: impl Into<String>, scanned_through: u64) -> Self {
        Self::starting_at(token_address, scanned_through.saturating_add(1))
    }

    /// Nothing at or above `next_block` has been scanned yet.
    pub fn starting_at(token_address: impl Into<String>, next_block: u64) -> Self {
        Self {
            token_address: token_address.into().to_ascii_lowercase(),
            next_block,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Last fully scanned block, or `None` when the scan has not passed block 0.
    pub fn scanned_through(&self) -> Option<u64> {
        self.next_block.checked_sub(1)
    }
}

/// Trait for storing and loading scan checkpoints.
///
/// `save` is monotonic: saving a lower `next_block` than the stored one
/// leaves the stored checkpoint unchanged.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a token contract.
    async fn load_checkpoint(
        &self,
        token_address: &str,
    ) -> Result<Option<ScanCheckpoint>, IndexerError>;

    /// Save a checkpoint, keeping the higher of the stored and new positions.
    async fn save_checkpoint(&self, checkpoint: ScanCheckpoint) -> Result<(), IndexerError>;

    /// Delete a checkpoint (forces a rescan from the ledger or genesis).
    async fn delete_checkpoint(&self, token_address: &str) -> Result<(), IndexerError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral ledgers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, ScanCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ScanCheckpoint>>, IndexerError> {
        self.data
            .lock()
            .map_err(|_| IndexerError::Storage("checkpoint store lock poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load_checkpoint(
        &self,
        token_address: &str,
    ) -> Result<Option<ScanCheckpoint>, IndexerError> {
        Ok(self.lock()?.get(&token_address.to_ascii_lowercase()).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: ScanCheckpoint) -> Result<(), IndexerError> {
        let mut data = self.lock()?;
        let key = checkpoint.token_address.to_ascii_lowercase();
        match data.get(&key) {
            Some(existing) if existing.next_block >= checkpoint.next_block => {}
            _ => {
                data.insert(key, checkpoint);
            }
        }
        Ok(())
    }

    async fn delete_checkpoint(&self, token_address: &str) -> Result<(), IndexerError> {
        self.lock()?.remove(&token_address.to_ascii_lowercase());
        Ok(())
    }
}
