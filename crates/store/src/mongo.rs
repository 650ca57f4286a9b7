//! `MongoDB` implementation of [`DocumentStore`].
use std::fmt;

use async_trait::async_trait;
use derive_more::Debug;
use eyre::{Context, Result, bail, eyre};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Database, IndexModel,
    bson::{self, Bson, Document as BsonDocument, doc},
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{FindOptions, UpdateOptions},
};
use primitives::retries::retry_with_backoff_if;
use tracing::{debug, info, warn};

use crate::{
    document::{
        Condition, DocRef, Direction, Document, DocumentStore, Op, Query, TransactionFn, Write,
        WriteMode,
    },
    models::{BLOCKS, DEPOSITS, WITHDRAWALS},
};

/// Maximum number of writes sent in a single `update` command.
pub const MONGO_MAX_BATCH_SIZE: usize = 500;

/// Attempts at committing a transaction whose outcome the server could not report.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Document store backed by a `MongoDB` replica set.
#[derive(Clone, Debug)]
pub struct MongoStore {
    #[debug(skip)]
    client: Client,
    #[debug(skip)]
    database: Database,
    database_name: String,
}

impl MongoStore {
    /// Connect to `uri` and use `database`.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .wrap_err("Failed to create MongoDB client")?;
        let handle = client.database(database);

        handle
            .run_command(doc! { "ping": 1 }, None)
            .await
            .wrap_err_with(|| format!("Failed to reach MongoDB database {database}"))?;

        info!(database, "Connected to MongoDB");
        Ok(Self { client, database: handle, database_name: database.to_owned() })
    }

    /// Create the secondary indexes used by filters and default orderings.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let indexes: [(&str, BsonDocument); 7] = [
            (BLOCKS, doc! { "blockNumber": -1 }),
            (BLOCKS, doc! { "status": 1, "blockNumber": -1 }),
            (BLOCKS, doc! { "blockType": 1, "blockNumber": -1 }),
            (DEPOSITS, doc! { "depositId": -1 }),
            (DEPOSITS, doc! { "sender": 1, "blockNumber": 1 }),
            (WITHDRAWALS, doc! { "relayedTimestamp": -1 }),
            (WITHDRAWALS, doc! { "status": 1, "relayedTimestamp": -1 }),
        ];

        for (collection, keys) in indexes {
            let model = IndexModel::builder().keys(keys).build();
            self.database
                .collection::<BsonDocument>(collection)
                .create_index(model, None)
                .await
                .wrap_err_with(|| format!("Failed to create index on {collection}"))?;
        }

        debug!(database = %self.database_name, "Indexes ensured");
        Ok(())
    }

    async fn anchor_clause(&self, collection: &str, query: &Query) -> Result<Option<BsonDocument>> {
        let Some(cursor) = query.start_after.as_deref() else { return Ok(None) };
        let Some(order) = query.order else {
            return Ok(Some(doc! { "_id": { "$gt": cursor } }));
        };

        let anchor = self
            .database
            .collection::<BsonDocument>(collection)
            .find_one(doc! { "_id": cursor }, None)
            .await?;
        // An unknown cursor starts from the beginning.
        let Some(anchor) = anchor else { return Ok(None) };

        let value = anchor.get(order.field).cloned().unwrap_or(Bson::Null);
        let past = match order.direction {
            Direction::Asc => "$gt",
            Direction::Desc => "$lt",
        };
        Ok(Some(doc! {
            "$or": [
                { order.field: { past: value.clone() } },
                { order.field: value, "_id": { "$gt": cursor } },
            ]
        }))
    }

    async fn transact_once(
        &self,
        reads: &[DocRef],
        apply: &TransactionFn<'_>,
    ) -> std::result::Result<(), TransactionError> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        let mut current = Vec::with_capacity(reads.len());
        for read in reads {
            let found = self
                .database
                .collection::<BsonDocument>(read.collection)
                .find_one_with_session(doc! { "_id": &read.key }, None, &mut session)
                .await?;
            current.push(found.map(from_bson).transpose().map_err(TransactionError::Body)?);
        }

        let writes = match apply(&current) {
            Ok(writes) => writes,
            Err(err) => {
                session.abort_transaction().await.ok();
                return Err(TransactionError::Body(err));
            }
        };

        let options = UpdateOptions::builder().upsert(true).build();
        for (target, fields) in writes {
            let fields = to_bson(&fields).map_err(TransactionError::Body)?;
            self.database
                .collection::<BsonDocument>(target.collection)
                .update_one_with_session(
                    doc! { "_id": &target.key },
                    doc! { "$set": fields },
                    options.clone(),
                    &mut session,
                )
                .await?;
        }

        commit_with_retry(&mut session).await
    }
}

async fn commit_with_retry(
    session: &mut ClientSession,
) -> std::result::Result<(), TransactionError> {
    let mut attempt = 1;
    loop {
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(err)
                if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && attempt < MAX_COMMIT_ATTEMPTS =>
            {
                warn!(attempt, error = %err, "Transaction commit result unknown, retrying commit");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Failure of one transaction attempt.
enum TransactionError {
    Mongo(mongodb::error::Error),
    Body(eyre::Report),
}

impl TransactionError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Mongo(err) => err.contains_label(TRANSIENT_TRANSACTION_ERROR),
            Self::Body(_) => false,
        }
    }

    fn into_report(self) -> eyre::Report {
        match self {
            Self::Mongo(err) => eyre::Report::new(err),
            Self::Body(err) => err,
        }
    }
}

impl From<mongodb::error::Error> for TransactionError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Mongo(err)
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mongo(err) => write!(f, "{err}"),
            Self::Body(err) => write!(f, "{err}"),
        }
    }
}

fn to_bson(document: &Document) -> Result<BsonDocument> {
    bson::to_document(document).wrap_err("Failed to encode document as BSON")
}

fn from_bson(mut document: BsonDocument) -> Result<Document> {
    document.remove("_id");
    match Bson::Document(document).into_relaxed_extjson() {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(eyre!("expected a document, got {other}")),
    }
}

fn value_to_bson(value: &serde_json::Value) -> Result<Bson> {
    bson::to_bson(value).wrap_err("Failed to encode value as BSON")
}

fn condition_to_bson(condition: &Condition) -> Result<BsonDocument> {
    let (operator, operand) = match &condition.op {
        Op::Eq(v) => ("$eq", value_to_bson(v)?),
        Op::In(vs) => {
            ("$in", Bson::Array(vs.iter().map(value_to_bson).collect::<Result<Vec<_>>>()?))
        }
        Op::Lt(v) => ("$lt", value_to_bson(v)?),
        Op::Lte(v) => ("$lte", value_to_bson(v)?),
        Op::Gt(v) => ("$gt", value_to_bson(v)?),
        Op::Gte(v) => ("$gte", value_to_bson(v)?),
    };
    Ok(doc! { condition.field: { operator: operand } })
}

fn filter(conditions: &[Condition], extra: Option<BsonDocument>) -> Result<BsonDocument> {
    let mut clauses = conditions.iter().map(condition_to_bson).collect::<Result<Vec<_>>>()?;
    clauses.extend(extra);
    Ok(if clauses.is_empty() { BsonDocument::new() } else { doc! { "$and": clauses } })
}

/// Extract the keys of newly inserted documents from an `update` command reply.
fn upserted_keys(reply: &BsonDocument, writes: &[Write]) -> Result<Vec<String>> {
    if let Ok(errors) = reply.get_array("writeErrors") {
        if let Some(first) = errors.first() {
            bail!("{} writes failed, first error: {first}", errors.len());
        }
    }

    let Ok(upserted) = reply.get_array("upserted") else { return Ok(Vec::new()) };
    upserted
        .iter()
        .map(|entry| {
            let index = entry
                .as_document()
                .and_then(|d| d.get("index"))
                .and_then(|i| i.as_i32().map(i64::from).or_else(|| i.as_i64()))
                .ok_or_else(|| eyre!("malformed upsert entry: {entry}"))?;
            usize::try_from(index)
                .ok()
                .and_then(|i| writes.get(i))
                .map(|w| w.key.clone())
                .ok_or_else(|| eyre!("upsert index {index} out of range"))
        })
        .collect()
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn max_batch_size(&self) -> usize {
        MONGO_MAX_BATCH_SIZE
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        self.database
            .collection::<BsonDocument>(collection)
            .find_one(doc! { "_id": key }, None)
            .await
            .wrap_err_with(|| format!("Failed to read {collection}/{key}"))?
            .map(from_bson)
            .transpose()
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let anchor = self.anchor_clause(collection, query).await?;
        let filter = filter(&query.conditions, anchor)?;

        let mut sort = BsonDocument::new();
        if let Some(order) = query.order {
            let direction = match order.direction {
                Direction::Asc => 1,
                Direction::Desc => -1,
            };
            sort.insert(order.field, direction);
        }
        sort.insert("_id", 1);

        let mut options = FindOptions::builder().sort(sort).build();
        options.limit = query.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));

        let documents: Vec<BsonDocument> = self
            .database
            .collection::<BsonDocument>(collection)
            .find(filter, options)
            .await
            .wrap_err_with(|| format!("Failed to query {collection}"))?
            .try_collect()
            .await?;

        documents.into_iter().map(from_bson).collect()
    }

    async fn count(&self, collection: &str, conditions: &[Condition]) -> Result<u64> {
        self.database
            .collection::<BsonDocument>(collection)
            .count_documents(filter(conditions, None)?, None)
            .await
            .wrap_err_with(|| format!("Failed to count {collection}"))
    }

    async fn commit(
        &self,
        collection: &str,
        writes: &[Write],
        mode: WriteMode,
    ) -> Result<Vec<String>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        if writes.len() > MONGO_MAX_BATCH_SIZE {
            bail!("batch of {} writes exceeds the limit of {MONGO_MAX_BATCH_SIZE}", writes.len());
        }

        let operator = match mode {
            WriteMode::Create => "$setOnInsert",
            WriteMode::Merge => "$set",
        };
        let updates = writes
            .iter()
            .map(|write| {
                Ok(Bson::Document(doc! {
                    "q": { "_id": &write.key },
                    "u": { operator: to_bson(&write.document)? },
                    "upsert": true,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        let reply = self
            .database
            .run_command(doc! { "update": collection, "updates": updates, "ordered": true }, None)
            .await
            .wrap_err_with(|| format!("Failed to commit {} writes to {collection}", writes.len()))?;

        let created = upserted_keys(&reply, writes)?;
        debug!(collection, writes = writes.len(), created = created.len(), "Committed batch");
        Ok(created)
    }

    async fn transact(&self, reads: &[DocRef], apply: &TransactionFn<'_>) -> Result<()> {
        retry_with_backoff_if(
            || self.transact_once(reads, apply),
            |err: &TransactionError| {
                let transient = err.is_transient();
                if transient {
                    warn!(error = %err, "Transient transaction error, retrying");
                }
                transient
            },
        )
        .await
        .map_err(TransactionError::into_report)
        .wrap_err("Transaction failed")
    }
}
