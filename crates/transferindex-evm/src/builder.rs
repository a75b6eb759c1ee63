//! Fluent builder API for creating transfer indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transferindex_evm::{IndexerBuilder, JsonRpcLogSource};
//! use transferindex_storage::InMemoryLedger;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let indexer = IndexerBuilder::new()
//!     .token("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")
//!     .genesis_block(19_000_000)
//!     .batch_size(500)
//!     .build(
//!         Arc::new(JsonRpcLogSource::connect("http://localhost:8545")?),
//!         Arc::new(InMemoryLedger::new()),
//!     )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use transferindex_core::config::{IndexerConfig, ResumeStrategy};
use transferindex_core::error::IndexerError;
use transferindex_core::ledger::Ledger;
use transferindex_core::source::LogSource;

use crate::supervisor::Indexer;

/// Fluent builder for `IndexerConfig` and [`Indexer`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Set the token contract to index.
    pub fn token(mut self, address: impl Into<String>) -> Self {
        self.config.token_address = address.into();
        self
    }

    /// Set the first block scanned when the ledger is empty.
    pub fn genesis_block(mut self, block: u64) -> Self {
        self.config.genesis_block = block;
        self
    }

    /// Set the number of blocks per `eth_getLogs` batch.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the pause between backfill batches in milliseconds.
    pub fn batch_delay_ms(mut self, ms: u64) -> Self {
        self.config.batch_delay_ms = ms;
        self
    }

    /// Set the reconciliation interval in milliseconds.
    pub fn reconcile_interval_ms(mut self, ms: u64) -> Self {
        self.config.reconcile_interval_ms = ms;
        self
    }

    /// Set the watcher's resubscribe backoff bounds in milliseconds.
    pub fn resubscribe_backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.resubscribe_initial_ms = initial;
        self.config.resubscribe_max_ms = max;
        self
    }

    pub fn resume_strategy(mut self, strategy: ResumeStrategy) -> Self {
        self.config.resume_strategy = strategy;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the configuration and build an idle [`Indexer`].
    pub fn build(
        self,
        source: Arc<dyn LogSource>,
        ledger: Arc<dyn Ledger>,
    ) -> Result<Indexer, IndexerError> {
        self.config.validate()?;
        Ok(Indexer::new(self.config, source, ledger))
    }
}
