//! transferindex-core: foundation for the ERC-20 transfer ledger.
//!
//! # Architecture
//!
//! ```text
//! LogSource ──► BackfillScanner ─┐
//!           └─► LiveWatcher ─────┼─► normalize() ─► LedgerStore ◄── query surface
//!     ReconciliationTimer ───────┘                  CheckpointStore
//! ```
//!
//! This crate holds the chain-agnostic pieces: the [`Transfer`] record, the
//! event [`normalizer`], the storage traits, the log source trait, and the
//! shared configuration. The pipeline itself lives in `transferindex-evm`.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod ledger;
pub mod normalizer;
pub mod query;
pub mod retry;
pub mod source;
pub mod types;

pub use checkpoint::{CheckpointStore, ScanCheckpoint};
pub use config::{IndexerConfig, IndexerState, ResumeStrategy};
pub use error::{IndexerError, NormalizeError};
pub use ledger::{InsertOutcome, Ledger, LedgerStore};
pub use normalizer::normalize;
pub use query::{PageRequest, Pagination};
pub use retry::{RetryConfig, RetryPolicy};
pub use source::{LogFilter, LogSource, LogStream};
pub use types::{BlockHeader, BlockRange, RawLog, StoredTransfer, Transfer};
