//! Shared types for the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Transfer ─────────────────────────────────────────────────────────────────

/// A canonical ERC-20 transfer, as produced by the normalizer.
///
/// All hex fields are lower-cased. `value` is the raw token amount as a
/// decimal string so that full 256-bit balances survive storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// Transaction hash (`0x` + 64 hex chars).
    pub transaction_hash: String,
    /// Block that contains the event.
    pub block_number: u64,
    /// Unix timestamp of the containing block (seconds).
    pub block_timestamp: u64,
    /// Sender address (`0x` + 40 hex chars).
    pub from: String,
    /// Recipient address (`0x` + 40 hex chars).
    pub to: String,
    /// Transferred amount, decimal.
    pub value: String,
    /// Token contract that emitted the event.
    pub token_address: String,
    /// Position of the log within its block.
    pub log_index: u64,
    /// Position of the transaction within its block.
    pub transaction_index: u64,
}

impl Transfer {
    /// The deduplication key of this record.
    pub fn key(&self) -> (&str, u64) {
        (&self.transaction_hash, self.log_index)
    }

    /// Returns `true` if `address` (already canonical) is the sender or recipient.
    pub fn involves(&self, address: &str) -> bool {
        self.from == address || self.to == address
    }
}

/// A transfer as persisted by a [`LedgerStore`](crate::ledger::LedgerStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTransfer {
    /// Store-assigned surrogate key, increasing with insertion order.
    pub id: i64,
    #[serde(flatten)]
    pub transfer: Transfer,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// A raw EVM log at the ingestion boundary.
///
/// Numeric positions are already decoded by the log source; topics and data
/// stay as hex strings until [`normalize`](crate::normalizer::normalize).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Contract that emitted the log.
    pub address: String,
    /// Indexed topics (`topics[0]` is the event signature hash).
    pub topics: Vec<String>,
    /// Non-indexed data (`0x…`).
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub transaction_index: u64,
    pub log_index: u64,
    /// Set by nodes for logs dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// The slice of a block the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    /// Unix timestamp (seconds since epoch).
    pub timestamp: u64,
}

// ─── BlockRange ───────────────────────────────────────────────────────────────

/// A closed block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Number of blocks covered (0 for an inverted range).
    pub fn len(&self) -> u64 {
        if self.to < self.from {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into contiguous, ascending batches of at most `size` blocks.
    pub fn batches(&self, size: u64) -> Vec<BlockRange> {
        let size = size.max(1);
        let mut out = Vec::new();
        if self.is_empty() {
            return out;
        }
        let mut start = self.from;
        loop {
            let end = start.saturating_add(size - 1).min(self.to);
            out.push(BlockRange::new(start, end));
            if end >= self.to {
                break;
            }
            start = end + 1;
        }
        out
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
