//! Per-category resumption points of the ingestion and finalization jobs.
use std::{fmt, sync::Arc};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{document::DocumentStore, repository::decode};

/// Collection of [`EventCursor`]s, keyed by category.
pub const EVENTS: &str = "events";

/// Independent stream of chain events tracked by its own cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventCategory {
    /// `BlockPosted` on the rollup contract (L2)
    Block,
    /// `Deposited` on the liquidity contract (L1)
    Deposit,
    /// Withdrawal queue events on the withdrawal contract (L2)
    WithdrawalQueue,
    /// Withdrawal payout events on the liquidity contract (L1)
    WithdrawalRelay,
}

impl EventCategory {
    /// Document key of the category's cursor.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Deposit => "deposit",
            Self::WithdrawalQueue => "withdrawalQueue",
            Self::WithdrawalRelay => "withdrawalRelay",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last chain block a category has been processed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCursor {
    /// Category
    pub category: EventCategory,
    /// Last processed chain block, inclusive
    pub last_block_number: u64,
}

/// Inclusive block range a run scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    /// First block
    pub start: u64,
    /// Last block
    pub end: u64,
}

impl ScanRange {
    /// Range from just after the cursor (or from the deployment block on a first run) up to
    /// `head`. `None` when there is nothing new to scan.
    pub fn resolve(cursor: Option<&EventCursor>, deployed_block: u64, head: u64) -> Option<Self> {
        let start = cursor.map_or(deployed_block, |c| c.last_block_number.saturating_add(1));
        (start <= head).then_some(Self { start, end: head })
    }
}

/// Read access to the event cursors. Cursors are only written through
/// [`crate::progress::commit_progress`].
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    store: Arc<dyn DocumentStore>,
}

impl CheckpointStore {
    /// Create a new [`CheckpointStore`].
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Cursor of `category`, if that category has ever been advanced.
    pub async fn get(&self, category: EventCategory) -> Result<Option<EventCursor>> {
        self.store
            .get(EVENTS, category.as_str())
            .await
            .wrap_err_with(|| format!("failed to read {category} cursor"))?
            .map(decode)
            .transpose()
    }
}
