//! SQLite vector store using sqlite-vec
//!
//! Two tables share one database file:
//! - `email_vectors`: a plain table with one metadata row per email (owner,
//!   model, JSON metadata, write time)
//! - `email_embeddings`: a `vec0` virtual table holding the embeddings,
//!   partitioned by user so k-NN only ever walks the requesting user's vectors
//!
//! Connections come from a deadpool-sqlite pool; the sqlite-vec extension is
//! registered as an auto-extension so every pooled connection has it.

use crate::error::{ImpMailError, Result};
use crate::storage::{StoredVector, VectorMatch, VectorStore};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_sqlite::{Config, Object, Pool, PoolConfig, Runtime};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::Once;
use tracing::{debug, info};

/// Default connection pool size
const DEFAULT_POOL_SIZE: usize = 8;

/// Default cap on a fetch-all-for-user scan
const DEFAULT_USER_SCAN_CAP: usize = 10_000;

/// Largest `k` a vec0 KNN query accepts
const MAX_KNN_K: usize = 4096;

static REGISTER_SQLITE_VEC: Once = Once::new();

fn register_sqlite_vec() {
    REGISTER_SQLITE_VEC.call_once(|| unsafe {
        use rusqlite::ffi::sqlite3_auto_extension;

        #[allow(clippy::missing_transmute_annotations)]
        sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Vector store backed by SQLite + sqlite-vec with connection pooling
pub struct SqliteVectorStore {
    pool: Pool,
    dimensions: usize,
    user_scan_cap: usize,
}

impl SqliteVectorStore {
    /// Open (or create) a vector database file
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `dimensions` - Embedding size; fixed for the lifetime of the table
    ///
    /// # Example
    /// ```ignore
    /// let store = SqliteVectorStore::new("impmail_vectors.db", 384)?;
    /// store.create_tables().await?;
    /// ```
    pub fn new<P: AsRef<Path>>(db_path: P, dimensions: usize) -> Result<Self> {
        Self::with_pool_size(db_path, dimensions, DEFAULT_POOL_SIZE, DEFAULT_USER_SCAN_CAP)
    }

    /// Open with a custom pool size and per-user scan cap
    pub fn with_pool_size<P: AsRef<Path>>(
        db_path: P,
        dimensions: usize,
        pool_size: usize,
        user_scan_cap: usize,
    ) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        info!(
            "Creating vector store pool at: {} (dimensions: {}, pool_size: {})",
            path.display(),
            dimensions,
            pool_size
        );

        register_sqlite_vec();

        let mut config = Config::new(path);
        config.pool = Some(PoolConfig::new(pool_size));
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            ImpMailError::Storage(format!("Failed to create connection pool: {}", e))
        })?;

        Ok(Self {
            pool,
            dimensions,
            user_scan_cap,
        })
    }

    /// Create the metadata table and the vec0 table if they do not exist
    pub async fn create_tables(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS email_vectors (
                email_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                model TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{{}}',
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_vectors_user
                ON email_vectors(user_id, updated_at);
            CREATE VIRTUAL TABLE IF NOT EXISTS email_embeddings USING vec0(
                email_id TEXT PRIMARY KEY,
                user_id text partition key,
                embedding float[{}] distance_metric=cosine
            );",
            self.dimensions
        );

        let conn = self.connection().await?;
        conn.interact(move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| ImpMailError::Storage(format!("Failed to create vector tables: {}", e)))
        })
        .await
        .map_err(interact_err)??;

        info!("Vector tables ready (dimensions: {})", self.dimensions);
        Ok(())
    }

    async fn connection(&self) -> Result<Object> {
        self.pool.get().await.map_err(|e| {
            ImpMailError::Storage(format!("Failed to get connection from pool: {}", e))
        })
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(ImpMailError::InvalidInput(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }
}

fn interact_err(e: deadpool_sqlite::InteractError) -> ImpMailError {
    ImpMailError::Storage(format!("Pool interaction failed: {}", e))
}

fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> ImpMailError {
    move |e| ImpMailError::Storage(format!("{}: {}", context, e))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Embeddings for `ids` owned by `user_id`, in the order given
fn load_owned(
    conn: &rusqlite::Connection,
    user_id: &str,
    ids: impl IntoIterator<Item = String>,
) -> Result<Vec<StoredVector>> {
    let mut owner = conn
        .prepare_cached("SELECT user_id FROM email_vectors WHERE email_id = ?1")
        .map_err(storage_err("Failed to prepare query"))?;
    let mut embedding = conn
        .prepare_cached("SELECT embedding FROM email_embeddings WHERE email_id = ?1")
        .map_err(storage_err("Failed to prepare query"))?;

    let mut found = Vec::new();
    for id in ids {
        let stored_for: Option<String> = owner
            .query_row(params![id], |row| row.get(0))
            .optional()
            .map_err(storage_err("Failed to retrieve vector"))?;
        if stored_for.as_deref() != Some(user_id) {
            continue;
        }

        let blob: Option<Vec<u8>> = embedding
            .query_row(params![id], |row| row.get(0))
            .optional()
            .map_err(storage_err("Failed to retrieve vector"))?;
        if let Some(blob) = blob {
            found.push(StoredVector {
                id,
                vector: decode_vector(&blob),
            });
        }
    }
    Ok(found)
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(
        &self,
        id: &str,
        user_id: &str,
        vector: &[f32],
        model: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        self.check_dimensions(vector)?;
        debug!("Storing vector for email: {}", id);

        let id = id.to_string();
        let user_id = user_id.to_string();
        let model = model.to_string();
        let blob = encode_vector(vector);
        let metadata = serde_json::to_string(&metadata)?;
        let updated_at = Utc::now().to_rfc3339();

        let conn = self.connection().await?;
        conn.interact(move |conn| -> Result<()> {
            let tx = conn
                .transaction()
                .map_err(storage_err("Failed to begin transaction"))?;

            tx.execute(
                "INSERT INTO email_vectors (email_id, user_id, model, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(email_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    model = excluded.model,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
                params![id, user_id, model, metadata, updated_at],
            )
            .map_err(storage_err("Failed to store vector metadata"))?;

            // vec0 has no upsert; replace the row
            tx.execute("DELETE FROM email_embeddings WHERE email_id = ?1", params![id])
                .map_err(storage_err("Failed to delete existing vector"))?;
            tx.execute(
                "INSERT INTO email_embeddings (email_id, user_id, embedding)
                 VALUES (?1, ?2, vec_f32(?3))",
                params![id, user_id, blob],
            )
            .map_err(storage_err("Failed to store vector"))?;

            tx.commit().map_err(storage_err("Failed to commit vector"))
        })
        .await
        .map_err(interact_err)?
    }

    async fn get_by_ids(&self, user_id: &str, ids: &[String]) -> Result<Vec<StoredVector>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let user_id = user_id.to_string();
        let ids = ids.to_vec();
        let conn = self.connection().await?;
        conn.interact(move |conn| load_owned(conn, &user_id, ids))
            .await
            .map_err(interact_err)?
    }

    async fn get_all_for_user(&self, user_id: &str) -> Result<Vec<StoredVector>> {
        let user_id = user_id.to_string();
        let cap = self.user_scan_cap as i64;
        let conn = self.connection().await?;
        conn.interact(move |conn| -> Result<Vec<StoredVector>> {
            let ids: Vec<String> = {
                let mut stmt = conn
                    .prepare(
                        "SELECT email_id FROM email_vectors
                         WHERE user_id = ?1
                         ORDER BY updated_at DESC, rowid DESC
                         LIMIT ?2",
                    )
                    .map_err(storage_err("Failed to prepare query"))?;
                let rows = stmt
                    .query_map(params![user_id, cap], |row| row.get(0))
                    .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<String>>>())
                    .map_err(storage_err("Failed to scan vectors"))?;
                rows
            };
            load_owned(conn, &user_id, ids)
        })
        .await
        .map_err(interact_err)?
    }

    /// KNN over the user's partition of the vec0 table
    ///
    /// sqlite-vec reports cosine distance (`1 - similarity`); it is converted
    /// back before `min_score` is applied. `k` is capped at 4096.
    async fn search(
        &self,
        vector: &[f32],
        user_id: &str,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<VectorMatch>> {
        self.check_dimensions(vector)?;
        debug!(
            "Searching vectors for user {} (k: {}, min_score: {})",
            user_id, k, min_score
        );
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = encode_vector(vector);
        let user_id = user_id.to_string();
        let k = k.min(MAX_KNN_K) as i64;
        let conn = self.connection().await?;
        let matches = conn
            .interact(move |conn| -> Result<Vec<VectorMatch>> {
                let mut stmt = conn
                    .prepare_cached(
                        "SELECT email_id, distance
                         FROM email_embeddings
                         WHERE embedding MATCH vec_f32(?1)
                           AND k = ?2
                           AND user_id = ?3
                         ORDER BY distance",
                    )
                    .map_err(storage_err("Failed to prepare search"))?;

                let rows = stmt
                    .query_map(params![query, k, user_id], |row| {
                        let id: String = row.get(0)?;
                        let distance: f64 = row.get(1)?;
                        Ok(VectorMatch {
                            id,
                            score: (1.0 - distance) as f32,
                        })
                    })
                    .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
                    .map_err(storage_err("Vector search failed"))?;
                Ok(rows)
            })
            .await
            .map_err(interact_err)??;

        let mut matches: Vec<VectorMatch> =
            matches.into_iter().filter(|m| m.score >= min_score).collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));

        debug!("Vector search returned {} results", matches.len());
        Ok(matches)
    }

    async fn count(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        let conn = self.connection().await?;
        conn.interact(move |conn| -> Result<usize> {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM email_vectors WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(storage_err("Failed to count vectors"))?;
            Ok(count as usize)
        })
        .await
        .map_err(interact_err)?
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let conn = self.connection().await?;
        conn.interact(move |conn| -> Result<bool> {
            let tx = conn
                .transaction()
                .map_err(storage_err("Failed to begin transaction"))?;
            let removed = tx
                .execute("DELETE FROM email_vectors WHERE email_id = ?1", params![id])
                .map_err(storage_err("Failed to delete vector"))?;
            tx.execute("DELETE FROM email_embeddings WHERE email_id = ?1", params![id])
                .map_err(storage_err("Failed to delete vector"))?;
            tx.commit().map_err(storage_err("Failed to commit delete"))?;
            Ok(removed > 0)
        })
        .await
        .map_err(interact_err)?
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<usize> {
        let user = user_id.to_string();
        let conn = self.connection().await?;
        let removed = conn
            .interact(move |conn| -> Result<usize> {
                let tx = conn
                    .transaction()
                    .map_err(storage_err("Failed to begin transaction"))?;

                let ids: Vec<String> = {
                    let mut stmt = tx
                        .prepare("SELECT email_id FROM email_vectors WHERE user_id = ?1")
                        .map_err(storage_err("Failed to prepare query"))?;
                    let rows = stmt
                        .query_map(params![user], |row| row.get(0))
                        .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<String>>>())
                        .map_err(storage_err("Failed to scan vectors"))?;
                    rows
                };

                for id in &ids {
                    tx.execute("DELETE FROM email_embeddings WHERE email_id = ?1", params![id])
                        .map_err(storage_err("Failed to delete vectors"))?;
                }
                tx.execute("DELETE FROM email_vectors WHERE user_id = ?1", params![user])
                    .map_err(storage_err("Failed to delete vectors"))?;
                tx.commit().map_err(storage_err("Failed to commit delete"))?;
                Ok(ids.len())
            })
            .await
            .map_err(interact_err)??;

        info!("Deleted {} vectors for user {}", removed, user_id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (SqliteVectorStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("vectors.db");
        let store = SqliteVectorStore::new(&db_path, 2).unwrap();
        store.create_tables().await.unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_blob_encoding() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (store, _dir) = create_test_store().await;
        let meta = serde_json::json!({"threadKey": "thread:T1"});

        store.upsert("e1", "u1", &[0.1, 0.2], "m", meta.clone()).await.unwrap();
        store.upsert("e1", "u1", &[0.3, 0.2], "m", meta).await.unwrap();

        let found = store
            .get_by_ids("u1", &["e1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].vector, vec![0.3, 0.2]);
        assert_eq!(store.count("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_by_ids_scoped_to_owner() {
        let (store, _dir) = create_test_store().await;
        store
            .upsert("e1", "u1", &[1.0, 0.0], "m", serde_json::Value::Null)
            .await
            .unwrap();

        let ids = vec!["e1".to_string()];
        assert!(store.get_by_ids("u2", &ids).await.unwrap().is_empty());
        assert_eq!(store.get_by_ids("u1", &ids).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_knn_ranks_by_cosine_within_user() {
        let (store, _dir) = create_test_store().await;
        let meta = serde_json::Value::Null;
        store.upsert("near", "u1", &[1.0, 0.1], "m", meta.clone()).await.unwrap();
        store.upsert("far", "u1", &[0.0, 1.0], "m", meta.clone()).await.unwrap();
        store.upsert("other", "u2", &[1.0, 0.0], "m", meta).await.unwrap();

        let hits = store.search(&[1.0, 0.0], "u1", 5, -1.0).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert!((hits[1].score - 0.0).abs() < 1e-4);

        let hits = store.search(&[1.0, 0.0], "u1", 1, -1.0).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hits = store.search(&[1.0, 0.0], "u1", 5, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "near");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let (store, _dir) = create_test_store().await;
        let err = store
            .upsert("e1", "u1", &[1.0, 0.0, 0.0], "m", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ImpMailError::InvalidInput(_)));

        let err = store.search(&[1.0], "u1", 5, -1.0).await.unwrap_err();
        assert!(matches!(err, ImpMailError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_for_user() {
        let (store, _dir) = create_test_store().await;
        for id in ["a", "b"] {
            store
                .upsert(id, "u1", &[1.0, 0.0], "m", serde_json::Value::Null)
                .await
                .unwrap();
        }
        store
            .upsert("c", "u2", &[1.0, 0.0], "m", serde_json::Value::Null)
            .await
            .unwrap();

        assert_eq!(store.delete_for_user("u1").await.unwrap(), 2);
        assert!(store.get_all_for_user("u1").await.unwrap().is_empty());
        assert!(store.search(&[1.0, 0.0], "u1", 5, -1.0).await.unwrap().is_empty());
        assert_eq!(store.get_all_for_user("u2").await.unwrap().len(), 1);
        assert!(store.delete("c").await.unwrap());
        assert!(!store.delete("c").await.unwrap());
    }
}
