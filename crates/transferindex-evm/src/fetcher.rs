//! JSON-RPC log source.
//!
//! Uses `eth_blockNumber`, `eth_getBlockByNumber` and `eth_getLogs` over
//! [`HttpTransport`]. Live subscriptions are polling-based: the stream
//! remembers the head at subscribe time and, every `poll_interval`, fetches
//! the logs of any newer blocks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use transferindex_core::error::IndexerError;
use transferindex_core::source::{LogFilter, LogSource, LogStream};
use transferindex_core::types::{BlockHeader, BlockRange, RawLog};

use crate::rpc::HttpTransport;

/// A log exactly as returned by `eth_getLogs` (hex quantities).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    pub transaction_index: Option<String>,
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl TryFrom<RpcLog> for RawLog {
    type Error = IndexerError;

    fn try_from(log: RpcLog) -> Result<Self, Self::Error> {
        fn required<'a>(v: &'a Option<String>, field: &str) -> Result<&'a str, IndexerError> {
            v.as_deref()
                .ok_or_else(|| IndexerError::Rpc(format!("log is missing '{field}' (pending?)")))
        }

        Ok(RawLog {
            block_number: parse_quantity(required(&log.block_number, "blockNumber")?)?,
            transaction_hash: required(&log.transaction_hash, "transactionHash")?.to_string(),
            transaction_index: parse_quantity(required(&log.transaction_index, "transactionIndex")?)?,
            log_index: parse_quantity(required(&log.log_index, "logIndex")?)?,
            removed: log.removed.unwrap_or(false),
            address: log.address,
            topics: log.topics,
            data: log.data,
        })
    }
}

/// Parse a JSON-RPC hex quantity (`"0x1a"`) into a `u64`.
pub fn parse_quantity(s: &str) -> Result<u64, IndexerError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return Err(IndexerError::Rpc(format!("invalid quantity '{s}'")));
    }
    u64::from_str_radix(digits, 16).map_err(|_| IndexerError::Rpc(format!("invalid quantity '{s}'")))
}

fn to_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// Convert an `eth_getBlockByNumber` result into a [`BlockHeader`].
pub fn block_from_json(v: &Value) -> Result<BlockHeader, IndexerError> {
    let field = |name: &str| -> Result<u64, IndexerError> {
        let raw = v[name]
            .as_str()
            .ok_or_else(|| IndexerError::Rpc(format!("block is missing '{name}'")))?;
        parse_quantity(raw)
    };
    Ok(BlockHeader {
        number: field("number")?,
        timestamp: field("timestamp")?,
    })
}

// ─── Raw RPC calls ───────────────────────────────────────────────────────────

struct EthRpc {
    transport: HttpTransport,
}

impl EthRpc {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let v = self.transport.call("eth_blockNumber", vec![]).await?;
        let raw = v
            .as_str()
            .ok_or_else(|| IndexerError::Rpc("eth_blockNumber returned a non-string".into()))?;
        parse_quantity(raw)
    }

    async fn block(&self, number: u64) -> Result<BlockHeader, IndexerError> {
        let v = self
            .transport
            .call("eth_getBlockByNumber", vec![json!(to_quantity(number)), json!(false)])
            .await?;
        if v.is_null() {
            return Err(IndexerError::Rpc(format!("block {number} not found")));
        }
        block_from_json(&v)
    }

    async fn logs(&self, filter: &LogFilter, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError> {
        let params = json!({
            "address": filter.address,
            "topics": [filter.topic0],
            "fromBlock": to_quantity(from),
            "toBlock": to_quantity(to),
        });
        let v = self.transport.call("eth_getLogs", vec![params]).await?;
        let logs: Vec<RpcLog> = serde_json::from_value(v)
            .map_err(|e| IndexerError::Rpc(format!("malformed eth_getLogs result: {e}")))?;
        logs.into_iter().map(RawLog::try_from).collect()
    }

    /// Logs for `range`, split into chunks of at most `chunk` blocks.
    async fn logs_chunked(
        &self,
        filter: &LogFilter,
        range: BlockRange,
        chunk: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let mut all = Vec::new();
        for part in range.batches(chunk) {
            all.extend(self.logs(filter, part.from, part.to).await?);
        }
        Ok(all)
    }
}

// ─── JsonRpcLogSource ────────────────────────────────────────────────────────

/// [`LogSource`] over an HTTP JSON-RPC endpoint.
pub struct JsonRpcLogSource {
    rpc: Arc<EthRpc>,
    poll_interval: Duration,
    max_range: u64,
}

impl JsonRpcLogSource {
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            rpc: Arc::new(EthRpc { transport }),
            poll_interval: Duration::from_secs(2),
            max_range: 1000,
        }
    }

    /// Connect to `url` with the default transport configuration.
    pub fn connect(url: impl Into<String>) -> Result<Self, IndexerError> {
        Ok(Self::new(HttpTransport::default_for(url)?))
    }

    /// How often a live subscription polls for new blocks.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Largest block range a subscription requests in one `eth_getLogs` call.
    pub fn max_range(mut self, blocks: u64) -> Self {
        self.max_range = blocks.max(1);
        self
    }
}

struct PollState {
    rpc: Arc<EthRpc>,
    filter: LogFilter,
    next: u64,
    interval: Duration,
    max_range: u64,
    done: bool,
}

impl PollState {
    /// Fetch logs for every block after the last polled head.
    async fn poll(&mut self) -> Result<Vec<RawLog>, IndexerError> {
        let head = self.rpc.block_number().await?;
        if head < self.next {
            return Ok(Vec::new());
        }
        let range = BlockRange::new(self.next, head);
        let logs = self.rpc.logs_chunked(&self.filter, range, self.max_range).await?;
        tracing::trace!(%range, count = logs.len(), "polled logs");
        self.next = head + 1;
        Ok(logs)
    }
}

#[async_trait]
impl LogSource for JsonRpcLogSource {
    async fn current_block_number(&self) -> Result<u64, IndexerError> {
        self.rpc.block_number().await
    }

    async fn get_block(&self, number: u64) -> Result<BlockHeader, IndexerError> {
        self.rpc.block(number).await
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        if to < from {
            return Ok(vec![]);
        }
        self.rpc.logs(filter, from, to).await
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream, IndexerError> {
        let head = self.rpc.block_number().await?;
        tracing::debug!(head, address = %filter.address, "log subscription opened");

        let state = PollState {
            rpc: Arc::clone(&self.rpc),
            filter: filter.clone(),
            next: head + 1,
            interval: self.poll_interval,
            max_range: self.max_range,
            done: false,
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if state.done {
                    return None;
                }
                tokio::time::sleep(state.interval).await;
                match state.poll().await {
                    Ok(logs) if logs.is_empty() => continue,
                    Ok(logs) => return Some((Ok(logs), state)),
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quantity_basic() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0xff").unwrap(), 255);
        assert_eq!(parse_quantity("0x12a05f200").unwrap(), 5_000_000_000);
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn rpc_log_converts_to_raw_log() {
        let wire = json!({
            "address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
            "data": "0x01",
            "blockNumber": "0x10",
            "blockHash": "0xabc",
            "transactionHash": "0x1234",
            "transactionIndex": "0x2",
            "logIndex": "0x5",
            "removed": false
        });
        let log: RpcLog = serde_json::from_value(wire).unwrap();
        let raw = RawLog::try_from(log).unwrap();
        assert_eq!(raw.block_number, 16);
        assert_eq!(raw.transaction_index, 2);
        assert_eq!(raw.log_index, 5);
        assert!(!raw.removed);
    }

    #[test]
    fn pending_log_is_rejected() {
        let wire = json!({
            "address": "0x00",
            "topics": [],
            "data": "0x",
            "blockNumber": null,
            "transactionHash": null,
            "transactionIndex": null,
            "logIndex": null
        });
        let log: RpcLog = serde_json::from_value(wire).unwrap();
        assert!(RawLog::try_from(log).is_err());
    }

    #[test]
    fn block_header_from_json() {
        let v = json!({ "number": "0x64", "timestamp": "0x6553f100", "hash": "0xabc" });
        let header = block_from_json(&v).unwrap();
        assert_eq!(header.number, 100);
        assert_eq!(header.timestamp, 1_700_000_000);
        assert!(block_from_json(&json!({ "number": "0x1" })).is_err());
    }
}
