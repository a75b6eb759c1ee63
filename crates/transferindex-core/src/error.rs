//! Error types for the transferindex pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting or querying transfers.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Normalize error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error came from the log source and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

/// Reasons a raw log cannot be turned into a [`Transfer`](crate::types::Transfer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("expected 3 topics, got {0}")]
    TopicCount(usize),

    #[error("topic0 {0} is not the Transfer event signature")]
    UnexpectedSignature(String),

    #[error("field '{field}' is not valid hex")]
    InvalidHex { field: &'static str },

    #[error("field '{field}' has length {actual} bytes, expected {expected}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("log data is empty")]
    EmptyData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_errors_are_transient() {
        assert!(IndexerError::Rpc("timeout".into()).is_transient());
        assert!(!IndexerError::Storage("disk full".into()).is_transient());
    }

    #[test]
    fn normalize_error_converts() {
        let err: IndexerError = NormalizeError::TopicCount(4).into();
        assert_eq!(err.to_string(), "Normalize error: expected 3 topics, got 4");
    }
}
