//! The log source contract: read-only access to chain RPC.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::normalizer::event_topic;
use crate::types::{BlockHeader, RawLog};

/// A stream of log batches from a live subscription.
///
/// An `Err` item means the subscription is broken; the consumer is expected
/// to resubscribe.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Vec<RawLog>, IndexerError>> + Send>>;

/// Which logs to fetch: one contract, one event signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Contract address (lower-case).
    pub address: String,
    /// `keccak256` of the event signature (`0x…`).
    pub topic0: String,
}

impl LogFilter {
    pub fn new(address: impl Into<String>, topic0: impl Into<String>) -> Self {
        Self {
            address: address.into().to_ascii_lowercase(),
            topic0: topic0.into().to_ascii_lowercase(),
        }
    }

    /// Build a filter from an event signature such as `"Transfer(address,address,uint256)"`.
    pub fn for_event(address: impl Into<String>, signature: &str) -> Self {
        Self::new(address, event_topic(signature))
    }

    /// Returns `true` if `log` was emitted by the filtered contract with the filtered topic0.
    pub fn matches(&self, log: &RawLog) -> bool {
        log.address.eq_ignore_ascii_case(&self.address)
            && log
                .topics
                .first()
                .map(|t| t.eq_ignore_ascii_case(&self.topic0))
                .unwrap_or(false)
    }
}

/// Read-only chain access used by the scanner and the watcher.
///
/// Implementations own their timeout and rate-limit behaviour.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Current chain head.
    async fn current_block_number(&self) -> Result<u64, IndexerError>;

    /// Header of block `number` (for its timestamp).
    async fn get_block(&self, number: u64) -> Result<BlockHeader, IndexerError>;

    /// All logs in `[from, to]` matching `filter`, ascending by block and log index.
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError>;

    /// Subscribe to matching logs produced from now on.
    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream, IndexerError>;
}
