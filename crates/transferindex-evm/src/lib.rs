//! transferindex-evm: the ERC-20 ingestion pipeline.
//!
//! - [`fetcher`]: `LogSource` over HTTP JSON-RPC
//! - [`backfill`]: historical range scans
//! - [`watcher`]: live subscription ingest with resubscribe backoff
//! - [`reconcile`]: periodic re-scan
//! - [`supervisor`]: the [`Indexer`] lifecycle that ties them together
//!
//! Enable the `mock` feature for a scripted in-memory `LogSource`.

pub mod backfill;
pub mod builder;
pub mod fetcher;
pub mod ingest;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod reconcile;
pub mod rpc;
pub mod supervisor;
pub mod watcher;

pub use backfill::{BackfillScanner, ScanReport};
pub use builder::IndexerBuilder;
pub use fetcher::JsonRpcLogSource;
pub use ingest::{IngestStats, Ingestor};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockLogSource;
pub use reconcile::ReconciliationTimer;
pub use rpc::{HttpTransport, HttpTransportConfig};
pub use supervisor::Indexer;
pub use watcher::LiveWatcher;
