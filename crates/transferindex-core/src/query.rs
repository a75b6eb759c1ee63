//! Pagination rules for the read-only query surface.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::normalizer::is_valid_address;

/// Default page size when the caller does not pass `limit`.
pub const DEFAULT_LIMIT: u64 = 100;
/// Largest page the query surface will serve.
pub const MAX_LIMIT: u64 = 1000;

/// A validated `limit`/`offset` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: u64,
    pub offset: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl PageRequest {
    /// Apply defaults and enforce `limit <= MAX_LIMIT`.
    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Result<Self, IndexerError> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        if limit > MAX_LIMIT {
            return Err(IndexerError::Other(format!("Limit cannot exceed {MAX_LIMIT}")));
        }
        Ok(Self {
            limit,
            offset: offset.unwrap_or(0),
        })
    }
}

/// Pagination metadata returned with a page of transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(total: u64, page: PageRequest) -> Self {
        Self {
            total,
            limit: page.limit,
            offset: page.offset,
            has_more: page.offset.saturating_add(page.limit) < total,
        }
    }
}

/// Reject anything that is not `0x` + 40 hex digits.
pub fn validate_address(address: &str) -> Result<(), IndexerError> {
    if is_valid_address(address) {
        Ok(())
    } else {
        Err(IndexerError::Other("Invalid Ethereum address format".into()))
    }
}
