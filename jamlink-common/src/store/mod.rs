//! Document store adapter
//!
//! Generic get/put/patch/delete/query/subscribe over named collections of
//! JSON documents keyed by opaque string ids. Two per-document atomic
//! primitives (`increment`, `union_append`) cover non-critical counters, and
//! `commit` provides the multi-document conditional write used wherever an
//! invariant spans more than one field or document.
//!
//! Every document carries a `version` that increases on each write; a
//! `WriteOp` may pin the version it observed, turning the commit into a
//! compare-and-swap that fails with [`Error::Conflict`] when another writer
//! got there first.
//!
//! Two backends: [`memory::MemoryStore`] (reference semantics, tests) and
//! [`sqlite::SqliteStore`] (sqlx/SQLite persistence).

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::Result;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// A stored document with its concurrency token
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    /// Monotonically increasing per-document write counter
    pub version: i64,
    pub body: Value,
}

/// Equality filter on a (possibly dotted) field path
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

/// Sort order for query results
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// A query over one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document body satisfies every filter
    pub fn matches(&self, body: &Value) -> bool {
        self.filters
            .iter()
            .all(|f| lookup_path(body, &f.field) == Some(&f.value))
    }
}

/// One write in a conditional commit batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    Create {
        collection: String,
        id: String,
        body: Value,
    },
    Update {
        collection: String,
        id: String,
        patch: Value,
        /// When set, the update fails with `Conflict` unless the stored
        /// version still matches.
        expect_version: Option<i64>,
    },
    Delete {
        collection: String,
        id: String,
        expect_version: Option<i64>,
    },
}

/// A change notification delivered to subscribers
///
/// `doc` is `None` for deletions.
#[derive(Debug, Clone)]
pub struct DocChange {
    pub collection: String,
    pub id: String,
    pub doc: Option<Document>,
}

/// Live stream of changes matching a subscription query
pub type ChangeStream = Pin<Box<dyn Stream<Item = DocChange> + Send>>;

/// Store adapter consumed by every workflow component
///
/// Implementations must make `increment` and `union_append` atomic per
/// document, and `commit` atomic across all its ops.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document; fails with `Conflict` if the id already exists.
    async fn create(&self, collection: &str, id: &str, body: Value) -> Result<()>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Shallow-merge `patch` fields into the document and bump its version.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()>;

    /// Delete a document. Deleting an absent document is a no-op.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Subscribe to future changes of documents matching the query.
    ///
    /// Deletions are delivered for the whole collection since the removed
    /// body can no longer be filtered. Slow subscribers observe a gap, not
    /// an error.
    async fn subscribe(&self, query: Query) -> Result<ChangeStream>;

    /// Atomically add `delta` to a numeric field (missing fields count as 0).
    async fn increment(&self, collection: &str, id: &str, field: &str, delta: i64) -> Result<()>;

    /// Atomically append `value` to an array field unless an equal element
    /// is already present.
    async fn union_append(&self, collection: &str, id: &str, field: &str, value: Value)
        -> Result<()>;

    /// Apply all ops atomically; fails with `Conflict` (applying nothing)
    /// if any version guard mismatches or a `Create` target exists.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()>;
}

/// Resolve a dotted field path (`"budget.spent"`) inside a document body.
pub fn lookup_path<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = body;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Shallow merge of top-level patch fields into a document body.
///
/// Document bodies are always JSON objects; nested objects in the patch
/// replace the stored field wholesale (the engine writes whole sub-documents
/// like `budget`, never nested partials).
pub fn merge_patch(body: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(fields)) = (body, patch) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Turn a broadcast receiver of raw changes into a filtered `ChangeStream`.
///
/// Shared by both backends; lagged receivers skip ahead instead of erroring.
pub(crate) fn filtered_changes(
    mut rx: broadcast::Receiver<DocChange>,
    query: Query,
) -> ChangeStream {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    if change.collection != query.collection {
                        continue;
                    }
                    let relevant = match &change.doc {
                        Some(doc) => query.matches(&doc.body),
                        // Deleted bodies cannot be filtered any more.
                        None => true,
                    };
                    if relevant {
                        yield change;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "change subscriber lagged, skipping ahead");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_path_nested() {
        let body = json!({"budget": {"spent": 150.0}, "title": "EP"});

        assert_eq!(lookup_path(&body, "title"), Some(&json!("EP")));
        assert_eq!(lookup_path(&body, "budget.spent"), Some(&json!(150.0)));
        assert_eq!(lookup_path(&body, "budget.total"), None);
        assert_eq!(lookup_path(&body, "missing.path"), None);
    }

    #[test]
    fn test_query_matches_all_filters() {
        let query = Query::collection("collaborationApplications")
            .filter("collaborationId", "c1")
            .filter("status", "pending");

        assert!(query.matches(&json!({"collaborationId": "c1", "status": "pending"})));
        assert!(!query.matches(&json!({"collaborationId": "c1", "status": "accepted"})));
        assert!(!query.matches(&json!({"collaborationId": "c2", "status": "pending"})));
    }

    #[test]
    fn test_merge_patch_replaces_top_level_fields() {
        let mut body = json!({"title": "EP", "views": 3, "budget": {"spent": 10.0}});
        merge_patch(&mut body, &json!({"views": 4, "budget": {"spent": 60.0, "total": 100.0}}));

        assert_eq!(body["title"], "EP");
        assert_eq!(body["views"], 4);
        // Nested objects replace wholesale.
        assert_eq!(body["budget"], json!({"spent": 60.0, "total": 100.0}));
    }
}
