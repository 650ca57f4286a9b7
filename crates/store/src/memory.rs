//! In-process [`DocumentStore`] with the same query semantics as the `MongoDB` store.
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    },
};

use async_trait::async_trait;
use eyre::{Result, bail, eyre};
use serde_json::Value;

use crate::document::{
    Condition, DocRef, Direction, Document, DocumentStore, OrderBy, Query, TransactionFn, Write,
    WriteMode, compare,
};

/// Same per-commit ceiling as the production store.
const DEFAULT_MAX_BATCH_SIZE: usize = 500;

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// Mutex-guarded in-memory document store, for tests and local dry runs.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    collections: Arc<Mutex<Collections>>,
    max_batch_size: usize,
    commits: Arc<AtomicUsize>,
    transactions: Arc<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_max_batch_size(DEFAULT_MAX_BATCH_SIZE)
    }

    /// Create an empty store accepting at most `max_batch_size` writes per commit.
    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            collections: Arc::default(),
            max_batch_size,
            commits: Arc::default(),
            transactions: Arc::default(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>> {
        self.collections.lock().map_err(|_| eyre!("memory store lock poisoned"))
    }

    /// Insert or replace a raw document, bypassing batching.
    pub fn put(&self, collection: &str, key: &str, document: Document) -> Result<()> {
        self.lock()?.entry(collection.to_owned()).or_default().insert(key.to_owned(), document);
        Ok(())
    }

    /// All documents of a collection, in key order.
    pub fn documents(&self, collection: &str) -> Result<Vec<Document>> {
        Ok(self.lock()?.get(collection).map(|c| c.values().cloned().collect()).unwrap_or_default())
    }

    /// Number of successful batched commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(AtomicOrdering::SeqCst)
    }

    /// Number of committed transactions so far.
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(AtomicOrdering::SeqCst)
    }
}

fn order_value<'a>(document: &'a Document, order: Option<OrderBy>) -> &'a Value {
    order.and_then(|o| document.get(o.field)).unwrap_or(&Value::Null)
}

fn ordering(
    (a_key, a): (&str, &Document),
    (b_key, b): (&str, &Document),
    order: Option<OrderBy>,
) -> Ordering {
    let by_field = compare(order_value(a, order), order_value(b, order));
    let by_field = match order.map(|o| o.direction) {
        Some(Direction::Desc) => by_field.reverse(),
        _ => by_field,
    };
    by_field.then_with(|| a_key.cmp(b_key))
}

fn merge_into(target: &mut Document, fields: Document) {
    for (field, value) in fields {
        target.insert(field, value);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        Ok(self.lock()?.get(collection).and_then(|c| c.get(key)).cloned())
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let collections = self.lock()?;
        let Some(documents) = collections.get(collection) else { return Ok(Vec::new()) };

        let anchor = query
            .start_after
            .as_deref()
            .and_then(|key| documents.get(key).map(|document| (key, document)));

        let mut matching: Vec<(&str, &Document)> = documents
            .iter()
            .map(|(key, document)| (key.as_str(), document))
            .filter(|(_, document)| query.conditions.iter().all(|c| c.matches(document)))
            .filter(|candidate| {
                anchor.is_none_or(|anchor| ordering(*candidate, anchor, query.order).is_gt())
            })
            .collect();
        matching.sort_by(|a, b| ordering(*a, *b, query.order));

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matching.into_iter().take(limit).map(|(_, document)| document.clone()).collect())
    }

    async fn count(&self, collection: &str, conditions: &[Condition]) -> Result<u64> {
        let collections = self.lock()?;
        let count = collections.get(collection).map_or(0, |documents| {
            documents.values().filter(|d| conditions.iter().all(|c| c.matches(d))).count()
        });
        Ok(count as u64)
    }

    async fn commit(
        &self,
        collection: &str,
        writes: &[Write],
        mode: WriteMode,
    ) -> Result<Vec<String>> {
        if writes.len() > self.max_batch_size {
            bail!("batch of {} writes exceeds the limit of {}", writes.len(), self.max_batch_size);
        }

        let mut collections = self.lock()?;
        let documents = collections.entry(collection.to_owned()).or_default();
        let mut created = Vec::new();

        for write in writes {
            match documents.get_mut(&write.key) {
                None => {
                    documents.insert(write.key.clone(), write.document.clone());
                    created.push(write.key.clone());
                }
                Some(existing) => {
                    if mode == WriteMode::Merge {
                        merge_into(existing, write.document.clone());
                    }
                }
            }
        }

        self.commits.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(created)
    }

    async fn transact(&self, reads: &[DocRef], apply: &TransactionFn<'_>) -> Result<()> {
        // Holding the lock for the whole body serializes transactions.
        let mut collections = self.lock()?;

        let current: Vec<Option<Document>> = reads
            .iter()
            .map(|r| collections.get(r.collection).and_then(|c| c.get(&r.key)).cloned())
            .collect();

        for (target, fields) in apply(&current)? {
            let documents = collections.entry(target.collection.to_owned()).or_default();
            merge_into(documents.entry(target.key).or_default(), fields);
        }

        self.transactions.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}
