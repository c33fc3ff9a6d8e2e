//! In-memory document store
//!
//! Reference implementation of [`DocumentStore`]: a `RwLock`ed map of
//! collections with the same versioning and commit semantics as the SQLite
//! backend. Used by the test suites and anywhere a throwaway store is
//! useful.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::store::{
    filtered_changes, lookup_path, merge_patch, ChangeStream, DocChange, Document, DocumentStore,
    Query, WriteOp,
};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct StoredDoc {
    version: i64,
    body: Value,
}

/// In-memory, fully concurrent-safe document store
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, StoredDoc>>>,
    changes: broadcast::Sender<DocChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            collections: RwLock::new(HashMap::new()),
            changes,
        }
    }

    fn emit(&self, change: DocChange) {
        // No subscribers is fine; changes are advisory.
        let _ = self.changes.send(change);
    }

    fn emit_upsert(&self, collection: &str, id: &str, doc: &StoredDoc) {
        self.emit(DocChange {
            collection: collection.to_string(),
            id: id.to_string(),
            doc: Some(Document {
                id: id.to_string(),
                version: doc.version,
                body: doc.body.clone(),
            }),
        });
    }

    fn emit_delete(&self, collection: &str, id: &str) {
        self.emit(DocChange {
            collection: collection.to_string(),
            id: id.to_string(),
            doc: None,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Total order over JSON values for `order_by`: numbers, then strings, then
/// everything else by serialized form.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, id: &str, body: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        let coll = collections.entry(collection.to_string()).or_default();
        if coll.contains_key(id) {
            return Err(Error::Conflict(format!(
                "document {collection}/{id} already exists"
            )));
        }
        let doc = StoredDoc { version: 1, body };
        self.emit_upsert(collection, id, &doc);
        coll.insert(id.to_string(), doc);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|coll| coll.get(id))
            .map(|doc| Document {
                id: id.to_string(),
                version: doc.version,
                body: doc.body.clone(),
            }))
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|coll| coll.get_mut(id))
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
        merge_patch(&mut doc.body, &patch);
        doc.version += 1;
        let doc = doc.clone();
        self.emit_upsert(collection, id, &doc);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let removed = collections
            .get_mut(collection)
            .and_then(|coll| coll.remove(id));
        if removed.is_some() {
            self.emit_delete(collection, id);
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        let mut results: Vec<Document> = collections
            .get(&query.collection)
            .map(|coll| {
                coll.iter()
                    .filter(|(_, doc)| query.matches(&doc.body))
                    .map(|(id, doc)| Document {
                        id: id.clone(),
                        version: doc.version,
                        body: doc.body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            results.sort_by(|a, b| {
                let va = lookup_path(&a.body, &order.field).unwrap_or(&Value::Null);
                let vb = lookup_path(&b.body, &order.field).unwrap_or(&Value::Null);
                let ord = compare_values(va, vb);
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn subscribe(&self, query: Query) -> Result<ChangeStream> {
        Ok(filtered_changes(self.changes.subscribe(), query))
    }

    async fn increment(&self, collection: &str, id: &str, field: &str, delta: i64) -> Result<()> {
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|coll| coll.get_mut(id))
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;

        let object = doc
            .body
            .as_object_mut()
            .ok_or_else(|| Error::Validation("document body is not an object".into()))?;
        let next = match object.get(field) {
            None | Some(Value::Null) => Value::from(delta),
            Some(Value::Number(n)) if n.is_i64() => Value::from(n.as_i64().unwrap_or(0) + delta),
            Some(Value::Number(n)) => Value::from(n.as_f64().unwrap_or(0.0) + delta as f64),
            Some(_) => {
                return Err(Error::Validation(format!(
                    "field '{field}' is not numeric"
                )))
            }
        };
        object.insert(field.to_string(), next);
        doc.version += 1;
        let doc = doc.clone();
        self.emit_upsert(collection, id, &doc);
        Ok(())
    }

    async fn union_append(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|coll| coll.get_mut(id))
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;

        let object = doc
            .body
            .as_object_mut()
            .ok_or_else(|| Error::Validation("document body is not an object".into()))?;
        let array = object
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        let items = array
            .as_array_mut()
            .ok_or_else(|| Error::Validation(format!("field '{field}' is not an array")))?;
        if !items.contains(&value) {
            items.push(value);
            doc.version += 1;
            let doc = doc.clone();
            self.emit_upsert(collection, id, &doc);
        }
        Ok(())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut collections = self.collections.write().await;

        // Validate every guard before touching anything, so a failed batch
        // applies nothing.
        for op in &ops {
            match op {
                WriteOp::Create { collection, id, .. } => {
                    if collections
                        .get(collection)
                        .is_some_and(|coll| coll.contains_key(id))
                    {
                        return Err(Error::Conflict(format!(
                            "document {collection}/{id} already exists"
                        )));
                    }
                }
                WriteOp::Update {
                    collection,
                    id,
                    expect_version,
                    ..
                } => {
                    let doc = collections
                        .get(collection)
                        .and_then(|coll| coll.get(id))
                        .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
                    if let Some(expected) = expect_version {
                        if doc.version != *expected {
                            return Err(Error::Conflict(format!(
                                "document {collection}/{id} changed (version {} != expected {})",
                                doc.version, expected
                            )));
                        }
                    }
                }
                WriteOp::Delete {
                    collection,
                    id,
                    expect_version,
                } => {
                    if let Some(expected) = expect_version {
                        match collections.get(collection).and_then(|coll| coll.get(id)) {
                            Some(doc) if doc.version == *expected => {}
                            Some(doc) => {
                                return Err(Error::Conflict(format!(
                                    "document {collection}/{id} changed (version {} != expected {})",
                                    doc.version, expected
                                )))
                            }
                            None => {
                                return Err(Error::Conflict(format!(
                                    "document {collection}/{id} deleted concurrently"
                                )))
                            }
                        }
                    }
                }
            }
        }

        for op in ops {
            match op {
                WriteOp::Create { collection, id, body } => {
                    let doc = StoredDoc { version: 1, body };
                    self.emit_upsert(&collection, &id, &doc);
                    collections
                        .entry(collection)
                        .or_default()
                        .insert(id, doc);
                }
                WriteOp::Update {
                    collection, id, patch, ..
                } => {
                    // Existence was validated above.
                    if let Some(doc) = collections
                        .get_mut(&collection)
                        .and_then(|coll| coll.get_mut(&id))
                    {
                        merge_patch(&mut doc.body, &patch);
                        doc.version += 1;
                        let doc = doc.clone();
                        self.emit_upsert(&collection, &id, &doc);
                    }
                }
                WriteOp::Delete { collection, id, .. } => {
                    let removed = collections
                        .get_mut(&collection)
                        .and_then(|coll| coll.remove(&id));
                    if removed.is_some() {
                        self.emit_delete(&collection, &id);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let store = MemoryStore::new();
        store
            .create("collaborations", "c1", json!({"title": "EP", "views": 0}))
            .await
            .expect("create");

        let doc = store.get("collaborations", "c1").await.expect("get").expect("present");
        assert_eq!(doc.version, 1);
        assert_eq!(doc.body["title"], "EP");

        store
            .update("collaborations", "c1", json!({"title": "LP"}))
            .await
            .expect("update");
        let doc = store.get("collaborations", "c1").await.expect("get").expect("present");
        assert_eq!(doc.version, 2);
        assert_eq!(doc.body["title"], "LP");
        assert_eq!(doc.body["views"], 0, "untouched fields survive a merge");

        store.delete("collaborations", "c1").await.expect("delete");
        assert!(store.get("collaborations", "c1").await.expect("get").is_none());

        // Deleting again is a no-op.
        store.delete("collaborations", "c1").await.expect("repeat delete");
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let store = MemoryStore::new();
        store.create("c", "1", json!({})).await.expect("create");
        let err = store.create("c", "1", json!({})).await.expect_err("duplicate");
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("c", "missing", json!({"a": 1}))
            .await
            .expect_err("missing");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_filters_order_limit() {
        let store = MemoryStore::new();
        for (id, status, applied) in [
            ("a1", "pending", 3),
            ("a2", "accepted", 1),
            ("a3", "pending", 2),
            ("a4", "pending", 1),
        ] {
            store
                .create(
                    "collaborationApplications",
                    id,
                    json!({"status": status, "appliedAt": applied}),
                )
                .await
                .expect("create");
        }

        let query = Query::collection("collaborationApplications")
            .filter("status", "pending")
            .order_by("appliedAt", true)
            .limit(2);
        let results = store.query(&query).await.expect("query");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a1");
        assert_eq!(results[1].id, "a3");
    }

    #[tokio::test]
    async fn test_increment_creates_and_adds() {
        let store = MemoryStore::new();
        store.create("c", "1", json!({"views": 2})).await.expect("create");

        store.increment("c", "1", "views", 3).await.expect("increment");
        store.increment("c", "1", "applications", 1).await.expect("missing field");

        let doc = store.get("c", "1").await.expect("get").expect("present");
        assert_eq!(doc.body["views"], 5);
        assert_eq!(doc.body["applications"], 1);
    }

    #[tokio::test]
    async fn test_union_append_dedups_by_equality() {
        let store = MemoryStore::new();
        store.create("c", "1", json!({})).await.expect("create");

        store.union_append("c", "1", "tags", json!("jazz")).await.expect("append");
        store.union_append("c", "1", "tags", json!("funk")).await.expect("append");
        store.union_append("c", "1", "tags", json!("jazz")).await.expect("dedup");

        let doc = store.get("c", "1").await.expect("get").expect("present");
        assert_eq!(doc.body["tags"], json!(["jazz", "funk"]));
    }

    #[tokio::test]
    async fn test_commit_applies_all_or_nothing() {
        let store = MemoryStore::new();
        store.create("c", "1", json!({"n": 1})).await.expect("create");
        store.create("c", "2", json!({"n": 2})).await.expect("create");

        // Stale guard on the second op: nothing applies.
        let err = store
            .commit(vec![
                WriteOp::Update {
                    collection: "c".into(),
                    id: "1".into(),
                    patch: json!({"n": 10}),
                    expect_version: Some(1),
                },
                WriteOp::Update {
                    collection: "c".into(),
                    id: "2".into(),
                    patch: json!({"n": 20}),
                    expect_version: Some(99),
                },
            ])
            .await
            .expect_err("stale guard");
        assert!(matches!(err, Error::Conflict(_)));

        let doc = store.get("c", "1").await.expect("get").expect("present");
        assert_eq!(doc.body["n"], 1, "first op must not have applied");

        // Matching guards: both apply.
        store
            .commit(vec![
                WriteOp::Update {
                    collection: "c".into(),
                    id: "1".into(),
                    patch: json!({"n": 10}),
                    expect_version: Some(1),
                },
                WriteOp::Update {
                    collection: "c".into(),
                    id: "2".into(),
                    patch: json!({"n": 20}),
                    expect_version: Some(1),
                },
            ])
            .await
            .expect("commit");

        assert_eq!(
            store.get("c", "1").await.expect("get").expect("present").body["n"],
            10
        );
        assert_eq!(
            store.get("c", "2").await.expect("get").expect("present").body["n"],
            20
        );
    }

    #[tokio::test]
    async fn test_guarded_delete_of_missing_doc_conflicts() {
        let store = MemoryStore::new();
        let err = store
            .commit(vec![WriteOp::Delete {
                collection: "c".into(),
                id: "gone".into(),
                expect_version: Some(1),
            }])
            .await
            .expect_err("guarded delete of missing doc");
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_subscribe_delivers_matching_changes() {
        let store = MemoryStore::new();
        let mut stream = store
            .subscribe(Query::collection("collaborations").filter("genre", "jazz"))
            .await
            .expect("subscribe");

        store
            .create("collaborations", "c1", json!({"genre": "jazz"}))
            .await
            .expect("create");
        store
            .create("collaborations", "c2", json!({"genre": "metal"}))
            .await
            .expect("create");
        store
            .update("collaborations", "c1", json!({"views": 1}))
            .await
            .expect("update");

        let first = stream.next().await.expect("first change");
        assert_eq!(first.id, "c1");
        let second = stream.next().await.expect("second change");
        assert_eq!(second.id, "c1");
        assert_eq!(second.doc.expect("doc").body["views"], 1);
    }
}
