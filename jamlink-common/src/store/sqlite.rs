//! SQLite-backed document store
//!
//! Persists documents in a single `documents` table keyed by
//! `(collection, id)`, with the JSON body in a TEXT column and a `version`
//! counter for conditional writes. Query filters use the JSON1
//! `json_extract` function, so the same dotted field paths work against
//! both backends.
//!
//! Transient lock contention surfaces as [`Error::StoreUnavailable`] so the
//! engine's retry layer can back off and try again; every other database
//! failure is wrapped verbatim.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::info;

use crate::store::{
    filtered_changes, merge_patch, ChangeStream, DocChange, Document, DocumentStore, Query,
    WriteOp,
};
use crate::{Error, Result};

/// SQLite-backed [`DocumentStore`]
pub struct SqliteStore {
    pool: SqlitePool,
    changes: broadcast::Sender<DocChange>,
}

/// Classify lock contention as transient so callers retry instead of failing.
fn map_db_err(err: sqlx::Error) -> Error {
    if err.to_string().contains("database is locked") {
        Error::StoreUnavailable(err.to_string())
    } else {
        Error::Database(err)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl SqliteStore {
    /// Open (creating if needed) a document database at the given path.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let newly_created = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(20)
            .min_connections(5)
            .connect(&db_url)
            .await
            .map_err(map_db_err)?;

        if newly_created {
            info!("Initialized new document store: {}", db_path.display());
        } else {
            info!("Opened existing document store: {}", db_path.display());
        }

        // WAL allows concurrent readers alongside one writer; the busy
        // timeout bounds lock waits before the retry layer takes over.
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .map_err(map_db_err)?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await
            .map_err(map_db_err)?;

        Self::init(pool).await
    }

    /// Open a private in-memory database (tests, scratch use).
    pub async fn open_in_memory() -> Result<Self> {
        // One connection only: each SQLite in-memory connection is its own
        // database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(map_db_err)?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                body TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(map_db_err)?;

        let (changes, _) = broadcast::channel(256);
        Ok(Self { pool, changes })
    }

    fn emit(&self, change: DocChange) {
        let _ = self.changes.send(change);
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
        let id: String = row.get("id");
        let version: i64 = row.get("version");
        let body: String = row.get("body");
        let body: Value = serde_json::from_str(&body)?;
        Ok(Document { id, version, body })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create(&self, collection: &str, id: &str, body: Value) -> Result<()> {
        let body_text = serde_json::to_string(&body)?;
        sqlx::query("INSERT INTO documents (collection, id, version, body) VALUES (?, ?, 1, ?)")
            .bind(collection)
            .bind(id)
            .bind(&body_text)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Conflict(format!("document {collection}/{id} already exists"))
                } else {
                    map_db_err(e)
                }
            })?;

        self.emit(DocChange {
            collection: collection.to_string(),
            id: id.to_string(),
            doc: Some(Document {
                id: id.to_string(),
                version: 1,
                body,
            }),
        });
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT id, version, body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let row =
            sqlx::query("SELECT id, version, body FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_err)?
                .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
        let mut doc = Self::row_to_document(&row)?;

        merge_patch(&mut doc.body, &patch);
        doc.version += 1;

        sqlx::query(
            "UPDATE documents SET body = ?, version = ?, updated_at = CURRENT_TIMESTAMP \
             WHERE collection = ? AND id = ?",
        )
        .bind(serde_json::to_string(&doc.body)?)
        .bind(doc.version)
        .bind(collection)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;

        self.emit(DocChange {
            collection: collection.to_string(),
            id: id.to_string(),
            doc: Some(doc),
        });
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        if result.rows_affected() > 0 {
            self.emit(DocChange {
                collection: collection.to_string(),
                id: id.to_string(),
                doc: None,
            });
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let mut sql = String::from("SELECT id, version, body FROM documents WHERE collection = ?");
        for _ in &query.filters {
            sql.push_str(" AND json_extract(body, ?) = ?");
        }
        if query.order_by.is_some() {
            sql.push_str(" ORDER BY json_extract(body, ?)");
        }
        if let Some(order) = &query.order_by {
            if order.descending {
                sql.push_str(" DESC");
            }
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query(&sql).bind(&query.collection);
        for filter in &query.filters {
            q = q.bind(format!("$.{}", filter.field));
            q = match &filter.value {
                Value::String(s) => q.bind(s.clone()),
                Value::Bool(b) => q.bind(*b),
                Value::Number(n) if n.is_i64() => q.bind(n.as_i64().unwrap_or(0)),
                Value::Number(n) => q.bind(n.as_f64().unwrap_or(0.0)),
                other => q.bind(other.to_string()),
            };
        }
        if let Some(order) = &query.order_by {
            q = q.bind(format!("$.{}", order.field));
        }

        let rows = q.fetch_all(&self.pool).await.map_err(map_db_err)?;
        rows.iter().map(Self::row_to_document).collect()
    }

    async fn subscribe(&self, query: Query) -> Result<ChangeStream> {
        Ok(filtered_changes(self.changes.subscribe(), query))
    }

    async fn increment(&self, collection: &str, id: &str, field: &str, delta: i64) -> Result<()> {
        // Single-statement increment: atomic per document without a
        // transaction round trip.
        let result = sqlx::query(
            "UPDATE documents \
             SET body = json_set(body, '$.' || ?3, COALESCE(json_extract(body, '$.' || ?3), 0) + ?4), \
                 version = version + 1, \
                 updated_at = CURRENT_TIMESTAMP \
             WHERE collection = ?1 AND id = ?2",
        )
        .bind(collection)
        .bind(id)
        .bind(field)
        .bind(delta)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("{collection}/{id}")));
        }

        if let Some(doc) = self.get(collection, id).await? {
            self.emit(DocChange {
                collection: collection.to_string(),
                id: id.to_string(),
                doc: Some(doc),
            });
        }
        Ok(())
    }

    async fn union_append(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let row =
            sqlx::query("SELECT id, version, body FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_err)?
                .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
        let mut doc = Self::row_to_document(&row)?;

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
        if items.contains(&value) {
            return Ok(());
        }
        items.push(value);
        doc.version += 1;

        sqlx::query(
            "UPDATE documents SET body = ?, version = ?, updated_at = CURRENT_TIMESTAMP \
             WHERE collection = ? AND id = ?",
        )
        .bind(serde_json::to_string(&doc.body)?)
        .bind(doc.version)
        .bind(collection)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;

        self.emit(DocChange {
            collection: collection.to_string(),
            id: id.to_string(),
            doc: Some(doc),
        });
        Ok(())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let mut changes: Vec<DocChange> = Vec::with_capacity(ops.len());

        for op in &ops {
            match op {
                WriteOp::Create { collection, id, body } => {
                    sqlx::query(
                        "INSERT INTO documents (collection, id, version, body) VALUES (?, ?, 1, ?)",
                    )
                    .bind(collection)
                    .bind(id)
                    .bind(serde_json::to_string(body)?)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            Error::Conflict(format!("document {collection}/{id} already exists"))
                        } else {
                            map_db_err(e)
                        }
                    })?;

                    changes.push(DocChange {
                        collection: collection.clone(),
                        id: id.clone(),
                        doc: Some(Document {
                            id: id.clone(),
                            version: 1,
                            body: body.clone(),
                        }),
                    });
                }
                WriteOp::Update {
                    collection,
                    id,
                    patch,
                    expect_version,
                } => {
                    let row = sqlx::query(
                        "SELECT id, version, body FROM documents WHERE collection = ? AND id = ?",
                    )
                    .bind(collection)
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_db_err)?
                    .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
                    let mut doc = Self::row_to_document(&row)?;

                    if let Some(expected) = expect_version {
                        if doc.version != *expected {
                            return Err(Error::Conflict(format!(
                                "document {collection}/{id} changed (version {} != expected {})",
                                doc.version, expected
                            )));
                        }
                    }

                    merge_patch(&mut doc.body, patch);
                    doc.version += 1;

                    sqlx::query(
                        "UPDATE documents SET body = ?, version = ?, updated_at = CURRENT_TIMESTAMP \
                         WHERE collection = ? AND id = ?",
                    )
                    .bind(serde_json::to_string(&doc.body)?)
                    .bind(doc.version)
                    .bind(collection)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_db_err)?;

                    changes.push(DocChange {
                        collection: collection.clone(),
                        id: id.clone(),
                        doc: Some(doc),
                    });
                }
                WriteOp::Delete {
                    collection,
                    id,
                    expect_version,
                } => {
                    if let Some(expected) = expect_version {
                        let version: Option<i64> = sqlx::query_scalar(
                            "SELECT version FROM documents WHERE collection = ? AND id = ?",
                        )
                        .bind(collection)
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(map_db_err)?;

                        match version {
                            Some(version) if version == *expected => {}
                            Some(version) => {
                                return Err(Error::Conflict(format!(
                                    "document {collection}/{id} changed (version {version} != expected {expected})"
                                )))
                            }
                            None => {
                                return Err(Error::Conflict(format!(
                                    "document {collection}/{id} deleted concurrently"
                                )))
                            }
                        }
                    }

                    let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                        .bind(collection)
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_db_err)?;

                    if result.rows_affected() > 0 {
                        changes.push(DocChange {
                            collection: collection.clone(),
                            id: id.clone(),
                            doc: None,
                        });
                    }
                }
            }
        }

        tx.commit().await.map_err(map_db_err)?;

        for change in changes {
            self.emit(change);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let store = SqliteStore::open_in_memory().await.expect("open");
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
        assert_eq!(doc.body["views"], 0);

        store.delete("collaborations", "c1").await.expect("delete");
        assert!(store.get("collaborations", "c1").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let store = SqliteStore::open_in_memory().await.expect("open");
        store.create("c", "1", json!({})).await.expect("create");
        let err = store.create("c", "1", json!({})).await.expect_err("duplicate");
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_query_with_json_filters() {
        let store = SqliteStore::open_in_memory().await.expect("open");
        for (id, status, applied) in [
            ("a1", "pending", 3),
            ("a2", "accepted", 1),
            ("a3", "pending", 2),
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
            .order_by("appliedAt", false);
        let results = store.query(&query).await.expect("query");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a3");
        assert_eq!(results[1].id, "a1");
    }

    #[tokio::test]
    async fn test_increment_and_union_append() {
        let store = SqliteStore::open_in_memory().await.expect("open");
        store.create("c", "1", json!({"views": 2})).await.expect("create");

        store.increment("c", "1", "views", 3).await.expect("increment");
        store.increment("c", "1", "applications", 1).await.expect("missing field");
        store.union_append("c", "1", "tags", json!("jazz")).await.expect("append");
        store.union_append("c", "1", "tags", json!("jazz")).await.expect("dedup");

        let doc = store.get("c", "1").await.expect("get").expect("present");
        assert_eq!(doc.body["views"], 5);
        assert_eq!(doc.body["applications"], 1);
        assert_eq!(doc.body["tags"], json!(["jazz"]));
    }

    #[tokio::test]
    async fn test_commit_rolls_back_on_stale_guard() {
        let store = SqliteStore::open_in_memory().await.expect("open");
        store.create("c", "1", json!({"n": 1})).await.expect("create");
        store.create("c", "2", json!({"n": 2})).await.expect("create");

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
        assert_eq!(doc.body["n"], 1, "transaction must have rolled back");
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("jamlink").join("documents.db");

        {
            let store = SqliteStore::open(&db_path).await.expect("open");
            store
                .create("collaborations", "c1", json!({"title": "EP"}))
                .await
                .expect("create");
        }

        let store = SqliteStore::open(&db_path).await.expect("reopen");
        let doc = store.get("collaborations", "c1").await.expect("get").expect("persisted");
        assert_eq!(doc.body["title"], "EP");
    }
}
