//! Document-store capability: the operations the indexer needs from its backing store.
use std::{cmp::Ordering, fmt};

use async_trait::async_trait;
use eyre::Result;
use serde::Serialize;
use serde_json::Value;

/// A stored document: a JSON object with camelCase top-level fields.
pub type Document = serde_json::Map<String, Value>;

/// Sort direction of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest value first
    Asc,
    /// Largest value first
    Desc,
}

/// Comparison applied by a [`Condition`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Field equals the value
    Eq(Value),
    /// Field equals one of the values
    In(Vec<Value>),
    /// Field is strictly lower than the value
    Lt(Value),
    /// Field is lower than or equal to the value
    Lte(Value),
    /// Field is strictly greater than the value
    Gt(Value),
    /// Field is greater than or equal to the value
    Gte(Value),
}

/// A predicate on one top-level field. Queries match the conjunction of their conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Field name
    pub field: &'static str,
    /// Comparison
    pub op: Op,
}

fn json<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl Condition {
    /// `field == value`
    pub fn eq<T: Serialize>(field: &'static str, value: T) -> Self {
        Self { field, op: Op::Eq(json(value)) }
    }

    /// `field ∈ values`
    pub fn is_in<T: Serialize>(field: &'static str, values: impl IntoIterator<Item = T>) -> Self {
        Self { field, op: Op::In(values.into_iter().map(json).collect()) }
    }

    /// `field < value`
    pub fn lt<T: Serialize>(field: &'static str, value: T) -> Self {
        Self { field, op: Op::Lt(json(value)) }
    }

    /// `field <= value`
    pub fn lte<T: Serialize>(field: &'static str, value: T) -> Self {
        Self { field, op: Op::Lte(json(value)) }
    }

    /// `field > value`
    pub fn gt<T: Serialize>(field: &'static str, value: T) -> Self {
        Self { field, op: Op::Gt(json(value)) }
    }

    /// `field >= value`
    pub fn gte<T: Serialize>(field: &'static str, value: T) -> Self {
        Self { field, op: Op::Gte(json(value)) }
    }

    /// Evaluate the condition against a document. A missing field only matches nothing.
    pub fn matches(&self, document: &Document) -> bool {
        let Some(actual) = document.get(self.field) else { return false };
        match &self.op {
            Op::Eq(expected) => compare(actual, expected) == Ordering::Equal,
            Op::In(candidates) => candidates.iter().any(|c| compare(actual, c) == Ordering::Equal),
            Op::Lt(bound) => comparable(actual, bound) && compare(actual, bound).is_lt(),
            Op::Lte(bound) => comparable(actual, bound) && compare(actual, bound).is_le(),
            Op::Gt(bound) => comparable(actual, bound) && compare(actual, bound).is_gt(),
            Op::Gte(bound) => comparable(actual, bound) && compare(actual, bound).is_ge(),
        }
    }
}

const fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Range comparisons only apply between values of the same type.
const fn comparable(a: &Value, b: &Value) -> bool {
    rank(a) == rank(b)
}

/// Total order over JSON values: null < numbers < strings < booleans < arrays < objects.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_u64(), y.as_u64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| compare(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Sort order. Ties are always broken by ascending document key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    /// Field to sort on
    pub field: &'static str,
    /// Direction of the sort
    pub direction: Direction,
}

/// A filtered, ordered and optionally paginated read of one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Conditions, all of which must hold
    pub conditions: Vec<Condition>,
    /// Sort order; key order when absent
    pub order: Option<OrderBy>,
    /// Key of the document the page starts after (exclusive)
    pub start_after: Option<String>,
    /// Maximum number of documents returned
    pub limit: Option<usize>,
}

/// How a batched write treats a key that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Insert the document only if its key is absent; existing documents are left untouched.
    Create,
    /// Set the given fields, inserting the document if its key is absent.
    Merge,
}

/// One document write of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    /// Document key
    pub key: String,
    /// Fields to write
    pub document: Document,
}

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    /// Collection name
    pub collection: &'static str,
    /// Document key
    pub key: String,
}

impl DocRef {
    /// Create a new [`DocRef`].
    pub fn new(collection: &'static str, key: impl Into<String>) -> Self {
        Self { collection, key: key.into() }
    }
}

/// Body of a transaction: receives the current value of every requested document (in request
/// order) and returns the documents to merge-write. It may be invoked more than once if the
/// store retries a conflicting transaction, so it must be free of side effects other than
/// its return value.
pub type TransactionFn<'a> =
    dyn Fn(&[Option<Document>]) -> Result<Vec<(DocRef, Document)>> + Send + Sync + 'a;

/// A collection-based document store.
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Maximum number of writes accepted by a single [`DocumentStore::commit`].
    fn max_batch_size(&self) -> usize;

    /// Read one document by key.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Run a query.
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;

    /// Count the documents matching all `conditions`.
    async fn count(&self, collection: &str, conditions: &[Condition]) -> Result<u64>;

    /// Commit a batch of writes and return the keys of the documents that did not exist before.
    async fn commit(&self, collection: &str, writes: &[Write], mode: WriteMode)
    -> Result<Vec<String>>;

    /// Read `reads`, compute writes with `apply` and commit them atomically. Writes are merges.
    async fn transact(&self, reads: &[DocRef], apply: &TransactionFn<'_>) -> Result<()>;
}
