//! Typed, paginated access to one entity collection.
use std::{marker::PhantomData, sync::Arc};

use chrono::Utc;
use eyre::{Context, Result, bail};
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::document::{
    Condition, Direction, Document, DocumentStore, OrderBy, Query, Write, WriteMode,
};

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Page size of the internal scans behind [`Repository::list_all`].
const SCAN_PAGE_SIZE: usize = 500;

/// Batches committed concurrently by [`Repository::upsert_batch`].
const WRITE_CONCURRENCY: usize = 4;

/// Something that can be written to a collection under a stable key.
pub trait Record: Serialize + Send + Sync {
    /// Document key.
    fn key(&self) -> String;
}

/// A stored entity with its collection, default order and filter.
pub trait Entity: Record + DeserializeOwned + Send + Sync + 'static {
    /// Name used in logs and error messages.
    const KIND: &'static str;
    /// Backing collection.
    const COLLECTION: &'static str;
    /// Default list order.
    const ORDER: OrderBy;
    /// Filter accepted by list and count operations.
    type Filter: Send + Sync;

    /// Translate a filter into store conditions.
    fn conditions(filter: &Self::Filter) -> Vec<Condition>;
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<E> {
    /// Entities of this page
    pub items: Vec<E>,
    /// Key of the last item, present only when another page follows
    pub next_cursor: Option<String>,
    /// Whether another page follows
    pub has_more: bool,
    /// Number of entities matching the filter, across all pages
    pub total_count: u64,
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(document) => Ok(document),
        other => bail!("expected a document, got {other}"),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(document: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// Repository of one entity type over a shared [`DocumentStore`].
#[derive(Debug)]
pub struct Repository<E> {
    store: Arc<dyn DocumentStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), _entity: PhantomData }
    }
}

impl<E: Entity> Repository<E> {
    /// Create a new [`Repository`].
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store, _entity: PhantomData }
    }

    /// List one page in the entity's default order.
    pub async fn list_page(
        &self,
        filter: &E::Filter,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page<E>> {
        self.list_page_ordered(filter, cursor, page_size, E::ORDER.direction).await
    }

    /// List one page with an explicit direction on the entity's order field.
    ///
    /// The page starts strictly after the `cursor` key. Ties on the order field are broken by
    /// key, so paging through a stable collection visits every entity exactly once.
    pub async fn list_page_ordered(
        &self,
        filter: &E::Filter,
        cursor: Option<&str>,
        page_size: Option<usize>,
        direction: Direction,
    ) -> Result<Page<E>> {
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let conditions = E::conditions(filter);
        let query = Query {
            conditions: conditions.clone(),
            order: Some(OrderBy { field: E::ORDER.field, direction }),
            start_after: cursor.map(str::to_owned),
            limit: Some(page_size + 1),
        };

        let (documents, total_count) = tokio::try_join!(
            self.store.find(E::COLLECTION, &query),
            self.store.count(E::COLLECTION, &conditions),
        )
        .wrap_err_with(|| format!("failed to list {}", E::KIND))?;

        let has_more = documents.len() > page_size;
        let items = documents
            .into_iter()
            .take(page_size)
            .map(decode)
            .collect::<Result<Vec<E>>>()
            .wrap_err_with(|| format!("failed to decode {}", E::KIND))?;
        let next_cursor = if has_more { items.last().map(Record::key) } else { None };

        Ok(Page { items, next_cursor, has_more, total_count })
    }

    /// Every entity matching `filter`, in ascending order of the entity's order field.
    pub async fn list_all(&self, filter: &E::Filter) -> Result<Vec<E>> {
        let conditions = E::conditions(filter);
        let order = Some(OrderBy { field: E::ORDER.field, direction: Direction::Asc });
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let query = Query {
                conditions: conditions.clone(),
                order,
                start_after: cursor.take(),
                limit: Some(SCAN_PAGE_SIZE),
            };
            let documents = self
                .store
                .find(E::COLLECTION, &query)
                .await
                .wrap_err_with(|| format!("failed to scan {}", E::KIND))?;
            let exhausted = documents.len() < SCAN_PAGE_SIZE;

            for document in documents {
                all.push(decode::<E>(document)?);
            }
            if exhausted {
                break;
            }
            cursor = all.last().map(Record::key);
        }

        debug!(kind = E::KIND, count = all.len(), "Scanned collection");
        Ok(all)
    }

    /// Look up one entity by hash key.
    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<E>> {
        self.store
            .get(E::COLLECTION, hash)
            .await
            .wrap_err_with(|| format!("failed to get {} {hash}", E::KIND))?
            .map(decode)
            .transpose()
    }

    /// Number of entities matching `filter`.
    pub async fn count(&self, filter: &E::Filter) -> Result<u64> {
        self.store
            .count(E::COLLECTION, &E::conditions(filter))
            .await
            .wrap_err_with(|| format!("failed to count {}", E::KIND))
    }

    /// Write `records`, split into batches no larger than the store accepts.
    ///
    /// Returns the keys that did not exist before. A failure aborts the call, but batches
    /// committed before it stay committed; writes are keyed, so re-running is safe.
    pub async fn upsert_batch<R: Record>(&self, records: &[R], mode: WriteMode) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = Value::String(Utc::now().to_rfc3339());
        let writes = records
            .iter()
            .map(|record| {
                let mut document = encode(record)?;
                if mode == WriteMode::Create {
                    document.insert("createdAt".to_owned(), created_at.clone());
                }
                Ok(Write { key: record.key(), document })
            })
            .collect::<Result<Vec<_>>>()?;

        let batch_size = self.store.max_batch_size().max(1);
        let created: Vec<Vec<String>> = stream::iter(writes.chunks(batch_size))
            .map(|batch| self.store.commit(E::COLLECTION, batch, mode))
            .buffer_unordered(WRITE_CONCURRENCY)
            .try_collect()
            .await
            .wrap_err_with(|| format!("failed to write {}", E::KIND))?;

        let created: Vec<String> = created.into_iter().flatten().collect();
        debug!(kind = E::KIND, written = writes.len(), created = created.len(), "Committed writes");
        Ok(created)
    }
}
