//! Atomic advancement of event cursors together with the aggregate deltas they account for.
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{Context, Result};
use tracing::{info, warn};

use crate::{
    checkpoint::{EVENTS, EventCategory, EventCursor},
    document::{DocRef, Document, DocumentStore},
    repository::{decode, encode},
    stats::{STATS, SUMMARY_KEY, StatsDelta, StatsSummary},
};

/// Move one category's cursor from the position a run started at to the end of its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorAdvance {
    /// Category to advance
    pub category: EventCategory,
    /// Cursor value the run read before scanning; `None` on a first run
    pub expected: Option<u64>,
    /// New cursor value
    pub to: u64,
}

impl CursorAdvance {
    /// Advance `category` from `started_from` to `to`.
    pub fn new(category: EventCategory, started_from: Option<&EventCursor>, to: u64) -> Self {
        Self { category, expected: started_from.map(|c| c.last_block_number), to }
    }
}

/// Everything a run records in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Cursors to advance
    pub cursors: Vec<CursorAdvance>,
    /// Aggregate contribution of the run
    pub stats: Option<StatsDelta>,
}

/// Result of [`commit_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// Cursors and stats were written
    Committed,
    /// A cursor moved since the run read it; nothing was written
    Superseded,
    /// The update was empty
    Skipped,
}

/// Advance the cursors and merge the stats delta in a single store transaction.
///
/// Every cursor is compared with the value its run started from. If any of them moved in the
/// meantime, another run already recorded (and counted) that range, and the whole update is
/// dropped.
pub async fn commit_progress(
    store: &dyn DocumentStore,
    update: &ProgressUpdate,
) -> Result<ProgressOutcome> {
    let stats = update.stats.as_ref().filter(|delta| !delta.is_empty());
    if update.cursors.is_empty() && stats.is_none() {
        return Ok(ProgressOutcome::Skipped);
    }

    let mut reads = vec![DocRef::new(STATS, SUMMARY_KEY)];
    reads.extend(update.cursors.iter().map(|c| DocRef::new(EVENTS, c.category.as_str())));

    let superseded = AtomicBool::new(false);
    let apply = |current: &[Option<Document>]| -> Result<Vec<(DocRef, Document)>> {
        superseded.store(false, Ordering::SeqCst);
        let Some((summary, cursors)) = current.split_first() else { return Ok(Vec::new()) };

        for (advance, stored) in update.cursors.iter().zip(cursors) {
            let stored: Option<EventCursor> = stored.clone().map(decode).transpose()?;
            if stored.map(|c| c.last_block_number) != advance.expected {
                superseded.store(true, Ordering::SeqCst);
                return Ok(Vec::new());
            }
        }

        let mut writes = Vec::with_capacity(update.cursors.len() + 1);
        for advance in &update.cursors {
            let to = advance.expected.map_or(advance.to, |from| from.max(advance.to));
            let cursor = EventCursor { category: advance.category, last_block_number: to };
            writes.push((DocRef::new(EVENTS, advance.category.as_str()), encode(&cursor)?));
        }
        if let Some(delta) = stats {
            let summary: StatsSummary =
                summary.clone().map(decode).transpose()?.unwrap_or_default();
            writes.push((DocRef::new(STATS, SUMMARY_KEY), encode(&summary.apply(delta))?));
        }
        Ok(writes)
    };

    store.transact(&reads, &apply).await.wrap_err("failed to commit progress")?;

    if superseded.load(Ordering::SeqCst) {
        warn!(cursors = ?update.cursors, "Progress superseded by a concurrent run, nothing recorded");
        return Ok(ProgressOutcome::Superseded);
    }
    info!(cursors = ?update.cursors, stats = ?stats, "Progress committed");
    Ok(ProgressOutcome::Committed)
}
