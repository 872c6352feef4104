//! SQLite-backed [`VectorIndex`] (indexed, on-disk backend).
//!
//! Each document is one row holding its content, its metadata as a JSON
//! object, and its embedding as a little-endian `f32` BLOB. A [`Filter`]
//! is translated into native SQL, one `json_extract(metadata_json, ?) = ?`
//! (or `IS NOT ?`) predicate per field, ANDed together, so only matching
//! rows are read and scored. `IS NOT` lets rows missing the field through,
//! the same as the in-memory filter.
//!
//! Opening a path that already holds an index reuses it; otherwise an
//! empty index is created. Reopening with an embedder whose width differs
//! from the stored vectors is refused. Writes are serialized through a mutex and run
//! in a single transaction per batch.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, Row, Sqlite, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use concierge_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use concierge_core::models::{Document, Filter, Metadata, MetadataValue, Op, ScoredDocument};
use concierge_core::store::VectorIndex;
use concierge_core::{Error, Result};

use crate::{db, migrate};

pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    write_lock: Mutex<()>,
}

impl SqliteIndex {
    /// Re-open the index at `path`, or initialize an empty one.
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let existed = path.exists();
        let pool = db::connect(path)
            .await
            .map_err(|e| Error::backend(format!("{:#}", e)))?;
        migrate::migrate_index(&pool).await.map_err(Error::backend)?;

        let mismatched: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM documents WHERE dims != ? LIMIT 1")
                .bind(embedder.dims() as i64)
                .fetch_optional(&pool)
                .await
                .map_err(Error::backend)?;
        if let Some(stored) = mismatched {
            pool.close().await;
            return Err(Error::BackendUnavailable(format!(
                "{}: index has {} dims but the embedder produces {}",
                path.display(),
                stored,
                embedder.dims()
            )));
        }

        info!(
            path = %path.display(),
            reopened = existed,
            "opened sqlite index"
        );
        Ok(Self::with_pool(pool, embedder))
    }

    pub fn with_pool(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            pool,
            embedder,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// `$."field"`: quoted so keys with dots or spaces are addressed literally.
fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

/// `WHERE` clause for a filter; empty when there is nothing to filter on.
fn where_clause(filter: Option<&Filter>) -> String {
    match filter {
        Some(f) if !f.is_empty() => {
            let preds: Vec<&str> = f
                .predicates()
                .iter()
                .map(|p| match p.op {
                    Op::Eq => "json_extract(metadata_json, ?) = ?",
                    Op::Ne => "json_extract(metadata_json, ?) IS NOT ?",
                })
                .collect();
            format!(" WHERE {}", preds.join(" AND "))
        }
        _ => String::new(),
    }
}

fn bind_filter<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    filter: Option<&Filter>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let Some(filter) = filter else {
        return query;
    };
    for p in filter.predicates() {
        query = query.bind(json_path(&p.field));
        query = match &p.value {
            MetadataValue::Text(s) => query.bind(s.clone()),
            MetadataValue::Int(i) => query.bind(*i),
            MetadataValue::Float(x) => query.bind(*x),
            MetadataValue::Bool(b) => query.bind(i64::from(*b)),
        };
    }
    query
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(Error::backend)?;
    Ok(Document {
        id: row.get("id"),
        content: row.get("content"),
        metadata,
    })
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn add_documents(&self, docs: &[Document]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != docs.len() {
            return Err(Error::BackendUnavailable(format!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                docs.len()
            )));
        }

        let _guard = self.write_lock.lock().await;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(Error::backend)?;
        for (doc, vector) in docs.iter().zip(&vectors) {
            let metadata_json = serde_json::to_string(&doc.metadata).map_err(Error::backend)?;
            sqlx::query(
                r#"
                INSERT INTO documents (id, content, metadata_json, embedding, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&doc.id)
            .bind(&doc.content)
            .bind(metadata_json)
            .bind(vec_to_blob(vector))
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::backend)?;
        }
        tx.commit().await.map_err(Error::backend)?;

        debug!(count = docs.len(), "wrote documents to sqlite index");
        Ok(docs.len())
    }

    async fn search(
        &self,
        query: &str,
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed_query(query).await?;

        let sql = format!(
            "SELECT id, content, metadata_json, embedding FROM documents{} ORDER BY seq",
            where_clause(filter)
        );
        let rows = bind_filter(sqlx::query(&sql), filter)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::backend)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(&query_vec, &blob_to_vec(&blob));
            scored.push(ScoredDocument {
                document: row_to_document(row)?,
                similarity,
            });
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn fetch(&self, filter: &Filter, limit: usize) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT id, content, metadata_json FROM documents{} ORDER BY seq LIMIT ?",
            where_clause(Some(filter))
        );
        let rows = bind_filter(sqlx::query(&sql), Some(filter))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::backend)?;
        rows.iter().map(row_to_document).collect()
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::backend)?;
        Ok(n as usize)
    }

    async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await
            .map_err(Error::backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::embedding::HashEmbedder;
    use concierge_core::models::keys;
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> SqliteIndex {
        SqliteIndex::open(&tmp.path().join("index.sqlite"), Arc::new(HashEmbedder::new(64)))
            .await
            .unwrap()
    }

    #[test]
    fn test_where_clause_ands_predicates() {
        let f = Filter::new().eq("category", "a").eq("user_id", "u");
        assert_eq!(
            where_clause(Some(&f)),
            " WHERE json_extract(metadata_json, ?) = ? AND json_extract(metadata_json, ?) = ?"
        );
        assert_eq!(
            where_clause(Some(&Filter::new().ne("category", "user_memory"))),
            " WHERE json_extract(metadata_json, ?) IS NOT ?"
        );
        assert_eq!(where_clause(None), "");
        assert_eq!(where_clause(Some(&Filter::new())), "");
    }

    #[test]
    fn test_json_path_quotes_field() {
        assert_eq!(json_path("category"), "$.\"category\"");
    }

    #[tokio::test]
    async fn test_native_filter_by_text_and_int() {
        let tmp = TempDir::new().unwrap();
        let idx = open(&tmp).await;
        idx.add_documents(&[
            Document::new("alpha product").with_meta(keys::CATEGORY, "product").with_meta(keys::CHUNK_INDEX, 0usize),
            Document::new("alpha service").with_meta(keys::CATEGORY, "service").with_meta(keys::CHUNK_INDEX, 1usize),
        ])
        .await
        .unwrap();

        let res = idx
            .search("alpha", Some(&Filter::category("service")), 5)
            .await
            .unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].document.content, "alpha service");

        let by_index = idx
            .fetch(&Filter::new().eq(keys::CHUNK_INDEX, 0i64), 10)
            .await
            .unwrap();
        assert_eq!(by_index.len(), 1);
        assert_eq!(by_index[0].content, "alpha product");
    }

    #[tokio::test]
    async fn test_reopen_keeps_documents() {
        let tmp = TempDir::new().unwrap();
        {
            let idx = open(&tmp).await;
            idx.add_documents(&[Document::new("persisted")]).await.unwrap();
            idx.close().await;
        }
        let idx = open(&tmp).await;
        assert_eq!(idx.count().await.unwrap(), 1);
        let docs = idx.fetch(&Filter::new(), 10).await.unwrap();
        assert_eq!(docs[0].content, "persisted");
    }

    #[tokio::test]
    async fn test_reopen_with_other_width_is_rejected() {
        let tmp = TempDir::new().unwrap();
        {
            let idx = open(&tmp).await;
            idx.add_documents(&[Document::new("sized")]).await.unwrap();
            idx.close().await;
        }
        let err = SqliteIndex::open(&tmp.path().join("index.sqlite"), Arc::new(HashEmbedder::new(32)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_not_equal_filter_keeps_rows_without_the_field() {
        let tmp = TempDir::new().unwrap();
        let idx = open(&tmp).await;
        idx.add_documents(&[
            Document::new("credit card note").with_meta(keys::CATEGORY, "user_memory"),
            Document::new("credit card policy").with_meta(keys::CATEGORY, "service"),
            Document::new("credit card faq"),
        ])
        .await
        .unwrap();

        let res = idx
            .search("credit card", Some(&Filter::new().ne(keys::CATEGORY, "user_memory")), 5)
            .await
            .unwrap();
        let contents: Vec<&str> = res.iter().map(|s| s.document.content.as_str()).collect();
        assert_eq!(res.len(), 2);
        assert!(!contents.contains(&"credit card note"));
    }

    #[tokio::test]
    async fn test_reset_empties_index() {
        let tmp = TempDir::new().unwrap();
        let idx = open(&tmp).await;
        idx.add_documents(&[Document::new("a"), Document::new("b")]).await.unwrap();
        idx.reset().await.unwrap();
        assert_eq!(idx.count().await.unwrap(), 0);
    }
}
