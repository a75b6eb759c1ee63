//! Scripted in-memory [`LogSource`] for tests and local demos.
//!
//! Seed it with logs and block timestamps, move the head, make ranges or
//! block lookups fail, and push batches to live subscribers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::channel::mpsc;

use transferindex_core::error::IndexerError;
use transferindex_core::normalizer::TRANSFER_EVENT_TOPIC;
use transferindex_core::source::{LogFilter, LogSource, LogStream};
use transferindex_core::types::{BlockHeader, BlockRange, RawLog};

type LiveSender = mpsc::UnboundedSender<Result<Vec<RawLog>, IndexerError>>;

#[derive(Default)]
struct MockState {
    head: u64,
    logs: Vec<RawLog>,
    timestamps: HashMap<u64, u64>,
    failing_ranges: Vec<BlockRange>,
    failing_blocks: HashSet<u64>,
    subscribe_failures: u32,
    head_failures: u32,
    subscribers: Vec<LiveSender>,
}

/// In-memory log source with call counters.
#[derive(Default)]
pub struct MockLogSource {
    state: Mutex<MockState>,
    get_logs_calls: AtomicUsize,
    get_block_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl MockLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    pub fn add_log(&self, log: RawLog) {
        self.state().logs.push(log);
    }

    pub fn add_logs(&self, logs: impl IntoIterator<Item = RawLog>) {
        self.state().logs.extend(logs);
    }

    pub fn set_timestamp(&self, block: u64, timestamp: u64) {
        self.state().timestamps.insert(block, timestamp);
    }

    /// Any `get_logs` call overlapping `[from, to]` fails until cleared.
    pub fn fail_range(&self, from: u64, to: u64) {
        self.state().failing_ranges.push(BlockRange::new(from, to));
    }

    pub fn clear_failing_ranges(&self) {
        self.state().failing_ranges.clear();
    }

    /// `get_block(block)` fails.
    pub fn fail_block_lookup(&self, block: u64) {
        self.state().failing_blocks.insert(block);
    }

    /// The next `n` calls to `subscribe_logs` fail.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.state().subscribe_failures = n;
    }

    /// The next `n` calls to `current_block_number` fail.
    pub fn fail_next_head_lookups(&self, n: u32) {
        self.state().head_failures = n;
    }

    /// Deliver `logs` to every open subscription. Returns how many received it.
    pub fn push_live(&self, logs: Vec<RawLog>) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|tx| !tx.is_closed());
        state
            .subscribers
            .iter()
            .filter(|tx| tx.unbounded_send(Ok(logs.clone())).is_ok())
            .count()
    }

    /// Send an error to every open subscription and close them.
    pub fn break_subscriptions(&self, reason: &str) {
        let mut state = self.state();
        for tx in state.subscribers.drain(..) {
            let _ = tx.unbounded_send(Err(IndexerError::Rpc(reason.to_string())));
        }
    }

    /// Number of currently open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    pub fn get_logs_calls(&self) -> usize {
        self.get_logs_calls.load(Ordering::SeqCst)
    }

    pub fn get_block_calls(&self) -> usize {
        self.get_block_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for MockLogSource {
    async fn current_block_number(&self) -> Result<u64, IndexerError> {
        let mut state = self.state();
        if state.head_failures > 0 {
            state.head_failures -= 1;
            return Err(IndexerError::Rpc("mock: head lookup failed".into()));
        }
        Ok(state.head)
    }

    async fn get_block(&self, number: u64) -> Result<BlockHeader, IndexerError> {
        self.get_block_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.failing_blocks.contains(&number) {
            return Err(IndexerError::Rpc(format!("mock: block {number} unavailable")));
        }
        let timestamp = state
            .timestamps
            .get(&number)
            .copied()
            .unwrap_or(1_600_000_000 + number * 12);
        Ok(BlockHeader { number, timestamp })
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state
            .failing_ranges
            .iter()
            .any(|r| r.from <= to && from <= r.to)
        {
            return Err(IndexerError::Rpc(format!("mock: getLogs [{from}, {to}] failed")));
        }
        let mut logs: Vec<RawLog> = state
            .logs
            .iter()
            .filter(|l| l.block_number >= from && l.block_number <= to && filter.matches(l))
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(logs)
    }

    async fn subscribe_logs(&self, _filter: &LogFilter) -> Result<LogStream, IndexerError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(IndexerError::Rpc("mock: subscribe failed".into()));
        }
        let (tx, rx) = mpsc::unbounded();
        state.subscribers.push(tx);
        Ok(Box::pin(rx))
    }
}

/// Build a well-formed ERC-20 `Transfer` log.
///
/// `from` / `to` are expanded to 20-byte addresses filled with that byte;
/// the transaction hash is derived from `block` and `log_index`.
pub fn transfer_log(
    token: &str,
    block: u64,
    log_index: u64,
    from: u8,
    to: u8,
    value: u128,
) -> RawLog {
    let topic_for = |b: u8| format!("0x{}{}", "00".repeat(12), format!("{b:02x}").repeat(20));
    RawLog {
        address: token.to_string(),
        topics: vec![TRANSFER_EVENT_TOPIC.to_string(), topic_for(from), topic_for(to)],
        data: format!("0x{value:064x}"),
        block_number: block,
        transaction_hash: format!("0x{:048x}{:016x}", block, log_index),
        transaction_index: log_index,
        log_index,
        removed: false,
    }
}

/// The 20-byte address [`transfer_log`] builds from `b`.
pub fn address_of(b: u8) -> String {
    format!("0x{}", format!("{b:02x}").repeat(20))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use transferindex_core::normalizer::normalize;

    const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    #[test]
    fn transfer_log_normalizes() {
        let t = normalize(&transfer_log(TOKEN, 5, 3, 0xaa, 0xbb, 42), 0).unwrap();
        assert_eq!(t.from, address_of(0xaa));
        assert_eq!(t.to, address_of(0xbb));
        assert_eq!(t.value, "42");
        assert_eq!(t.transaction_hash.len(), 66);
    }

    #[tokio::test]
    async fn get_logs_filters_and_fails_on_overlap() {
        let source = MockLogSource::new();
        let filter = LogFilter::for_event(TOKEN, "Transfer(address,address,uint256)");
        source.add_logs([
            transfer_log(TOKEN, 12, 0, 1, 2, 1),
            transfer_log(TOKEN, 3, 0, 1, 2, 1),
            transfer_log("0x1111111111111111111111111111111111111111", 4, 0, 1, 2, 1),
        ]);

        let logs = source.get_logs(&filter, 0, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, 3);

        source.fail_range(10, 10);
        assert!(source.get_logs(&filter, 5, 15).await.is_err());
        assert!(source.get_logs(&filter, 0, 9).await.is_ok());
        assert_eq!(source.get_logs_calls(), 3);
    }

    #[tokio::test]
    async fn live_push_reaches_subscribers() {
        let source = MockLogSource::new();
        let filter = LogFilter::for_event(TOKEN, "Transfer(address,address,uint256)");
        let mut stream = source.subscribe_logs(&filter).await.unwrap();

        assert_eq!(source.push_live(vec![transfer_log(TOKEN, 1, 0, 1, 2, 1)]), 1);
        let batch = stream.next().await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);

        source.break_subscriptions("gone");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
