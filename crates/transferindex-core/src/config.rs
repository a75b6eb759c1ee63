//! Indexer configuration and state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::normalizer::{canonical_address, TRANSFER_EVENT_SIGNATURE};
use crate::source::LogFilter;

/// How the backfill scanner decides where to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeStrategy {
    /// Resume after the fully-scanned-through checkpoint; a failed batch
    /// freezes the checkpoint so the range is rescanned next run.
    #[default]
    Checkpoint,
    /// Resume after `MAX(block_number)` in the ledger. Failed batches below
    /// a later successful batch are skipped permanently.
    HighWaterMark,
}

impl std::str::FromStr for ResumeStrategy {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkpoint" => Ok(Self::Checkpoint),
            "high-water-mark" | "hwm" => Ok(Self::HighWaterMark),
            other => Err(IndexerError::Config(format!(
                "unknown resume strategy '{other}' (expected 'checkpoint' or 'high-water-mark')"
            ))),
        }
    }
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Token contract to index. Required.
    pub token_address: String,
    /// Event signature to filter on.
    #[serde(default = "default_event_signature")]
    pub event_signature: String,
    /// First block to scan when the ledger has no history.
    #[serde(default)]
    pub genesis_block: u64,
    /// How many blocks to request per `eth_getLogs` call.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Pause between backfill batches (milliseconds).
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Reconciliation interval (milliseconds).
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    /// First watcher resubscribe delay (milliseconds).
    #[serde(default = "default_resubscribe_initial_ms")]
    pub resubscribe_initial_ms: u64,
    /// Cap on the watcher resubscribe delay (milliseconds).
    #[serde(default = "default_resubscribe_max_ms")]
    pub resubscribe_max_ms: u64,
    #[serde(default)]
    pub resume_strategy: ResumeStrategy,
}

fn default_event_signature() -> String {
    TRANSFER_EVENT_SIGNATURE.to_string()
}
fn default_batch_size() -> u64 { 1000 }
fn default_batch_delay_ms() -> u64 { 100 }
fn default_reconcile_interval_ms() -> u64 { 30_000 }
fn default_resubscribe_initial_ms() -> u64 { 500 }
fn default_resubscribe_max_ms() -> u64 { 60_000 }

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            token_address: String::new(),
            event_signature: default_event_signature(),
            genesis_block: 0,
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            resubscribe_initial_ms: default_resubscribe_initial_ms(),
            resubscribe_max_ms: default_resubscribe_max_ms(),
            resume_strategy: ResumeStrategy::default(),
        }
    }
}

impl IndexerConfig {
    /// Check the configuration; a missing or malformed token address is fatal.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.token_address.trim().is_empty() {
            return Err(IndexerError::Config("token address is required".into()));
        }
        canonical_address(&self.token_address).map_err(|e| {
            IndexerError::Config(format!("invalid token address '{}': {e}", self.token_address))
        })?;
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch size must be at least 1".into()));
        }
        if self.reconcile_interval_ms == 0 {
            return Err(IndexerError::Config(
                "reconcile interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Lower-case token address (call after [`validate`](Self::validate)).
    pub fn token(&self) -> String {
        self.token_address.trim().to_ascii_lowercase()
    }

    /// The log filter this configuration describes.
    pub fn log_filter(&self) -> LogFilter {
        LogFilter::for_event(self.token(), &self.event_signature)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

/// Lifecycle state of an indexer supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Running the initial backfill pass.
    Backfilling,
    /// Watcher and reconciliation timer are running.
    Live,
    /// Shutting down.
    Stopping,
    /// Terminated; the ledger handle has been released.
    Stopped,
}

impl IndexerState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Backfilling | Self::Live)
    }
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
