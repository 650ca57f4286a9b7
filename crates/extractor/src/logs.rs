use alloy::{
    primitives::B256,
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};
use eyre::{Context, Result, eyre};
use tracing::debug;

use crate::ChainClient;

/// A decoded event together with where it was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog<E> {
    /// Decoded event data
    pub event: E,
    /// Block the log was emitted in
    pub block_number: u64,
    /// Transaction that emitted the log
    pub tx_hash: B256,
    /// Block timestamp, when the node includes it in log responses
    pub block_timestamp: Option<u64>,
}

/// Split `[start, end]` into consecutive inclusive windows of at most `width` blocks.
pub fn split_range(start: u64, end: u64, width: u64) -> Vec<(u64, u64)> {
    let width = width.max(1);
    let mut windows = Vec::new();
    let mut from = start;
    while from <= end {
        let to = from.saturating_add(width - 1).min(end);
        windows.push((from, to));
        if to == u64::MAX {
            break;
        }
        from = to + 1;
    }
    windows
}

/// Fetch the logs matching `filter` in `[start, end]`, one window of `width` blocks at a time.
pub async fn fetch_logs(
    client: &dyn ChainClient,
    filter: &Filter,
    start: u64,
    end: u64,
    width: u64,
) -> Result<Vec<Log>> {
    let mut logs = Vec::new();
    for (from, to) in split_range(start, end, width) {
        let window = filter.clone().from_block(from).to_block(to);
        let batch = client
            .logs(&window)
            .await
            .wrap_err_with(|| format!("failed to fetch logs in blocks {from}..={to}"))?;
        debug!(from, to, count = batch.len(), "Fetched logs");
        logs.extend(batch);
    }
    Ok(logs)
}

/// Decode logs as `E`. Any log that does not decode, or lacks its block or transaction, fails
/// the whole batch.
pub fn decode_logs<E: SolEvent>(logs: &[Log]) -> Result<Vec<EventLog<E>>> {
    logs.iter()
        .map(|log| {
            let decoded = log
                .log_decode::<E>()
                .wrap_err_with(|| format!("failed to decode {} log", E::SIGNATURE))?;
            let block_number =
                log.block_number.ok_or_else(|| eyre!("{} log without block number", E::SIGNATURE))?;
            let tx_hash = log
                .transaction_hash
                .ok_or_else(|| eyre!("{} log without transaction hash", E::SIGNATURE))?;
            Ok(EventLog {
                event: decoded.inner.data,
                block_number,
                tx_hash,
                block_timestamp: log.block_timestamp,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_fixed_width_windows() {
        assert_eq!(split_range(0, 9, 4), vec![(0, 3), (4, 7), (8, 9)]);
        assert_eq!(split_range(5, 5, 100), vec![(5, 5)]);
        assert_eq!(split_range(10, 9, 100), vec![]);
    }

    #[test]
    fn zero_width_is_one_block() {
        assert_eq!(split_range(1, 3, 0), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn stops_at_u64_max() {
        assert_eq!(split_range(u64::MAX - 1, u64::MAX, 10), vec![(u64::MAX - 1, u64::MAX)]);
    }
}
