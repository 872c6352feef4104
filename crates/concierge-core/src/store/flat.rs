//! Flat, brute-force [`VectorIndex`] held in memory.
//!
//! Vectors live in one `Vec` behind a `std::sync::RwLock`. Search scores
//! every stored vector with cosine similarity. There is no native filter:
//! a filtered search post-filters the `top_k * overfetch` nearest entries
//! and doubles that window while fewer than `top_k` matches have been
//! collected and unscanned entries remain. It stops as soon as `top_k`
//! matches are found, so it returns the same documents a native filter
//! would.
//!
//! Persistence (save/load of an index file plus a document store file)
//! is layered on top by the app crate using [`FlatIndex::snapshot`] and
//! [`FlatIndex::from_entries`].

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::VectorIndex;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{Error, Result};
use crate::models::{Document, Filter, ScoredDocument};

/// A stored document and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatEntry {
    pub document: Document,
    pub vector: Vec<f32>,
}

pub struct FlatIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<FlatEntry>>,
    overfetch: usize,
}

impl FlatIndex {
    /// Minimum over-fetch factor applied to filtered searches.
    pub const MIN_OVERFETCH: usize = 2;

    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::from_entries(embedder, Vec::new())
    }

    pub fn from_entries(embedder: Arc<dyn Embedder>, entries: Vec<FlatEntry>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(entries),
            overfetch: Self::MIN_OVERFETCH,
        }
    }

    /// Widen the filtered-search window. Values below 2 are raised to 2.
    pub fn with_overfetch(mut self, factor: usize) -> Self {
        self.overfetch = factor.max(Self::MIN_OVERFETCH);
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Copy of every entry, in insertion order.
    pub fn snapshot(&self) -> Result<Vec<FlatEntry>> {
        Ok(self.read()?.clone())
    }

    /// Drop every entry past the first `len`. Used to undo an append
    /// whose persistence failed.
    pub fn truncate(&self, len: usize) -> Result<()> {
        self.write()?.truncate(len);
        Ok(())
    }

    /// Replace all entries.
    pub fn restore(&self, entries: Vec<FlatEntry>) -> Result<()> {
        *self.write()? = entries;
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<FlatEntry>>> {
        self.entries
            .read()
            .map_err(|_| Error::BackendUnavailable("flat index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<FlatEntry>>> {
        self.entries
            .write()
            .map_err(|_| Error::BackendUnavailable("flat index lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn backend(&self) -> &'static str {
        "flat"
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

        let mut entries = self.write()?;
        entries.extend(docs.iter().cloned().zip(vectors).map(|(document, vector)| FlatEntry {
            document,
            vector,
        }));
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
        let entries = self.read()?;

        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(&query_vec, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut window = match filter {
            Some(f) if !f.is_empty() => top_k.saturating_mul(self.overfetch),
            _ => top_k,
        };

        let mut results = Vec::with_capacity(top_k);
        let mut scanned = 0;
        while results.len() < top_k && scanned < scored.len() {
            let end = window.min(scored.len());
            for &(i, similarity) in &scored[scanned..end] {
                let entry = &entries[i];
                if filter.map_or(true, |f| f.matches(&entry.document.metadata)) {
                    results.push(ScoredDocument {
                        document: entry.document.clone(),
                        similarity,
                    });
                    if results.len() == top_k {
                        break;
                    }
                }
            }
            scanned = end;
            window = window.saturating_mul(2);
        }
        Ok(results)
    }

    async fn fetch(&self, filter: &Filter, limit: usize) -> Result<Vec<Document>> {
        Ok(self
            .read()?
            .iter()
            .filter(|e| filter.matches(&e.document.metadata))
            .take(limit)
            .map(|e| e.document.clone())
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn reset(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::keys;

    fn index() -> FlatIndex {
        FlatIndex::new(Arc::new(HashEmbedder::new(128)))
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new("laptop battery warranty lasts two years").with_meta(keys::CATEGORY, "product"),
            Document::new("laptop screen sizes and prices").with_meta(keys::CATEGORY, "product"),
            Document::new("return a laptop within thirty days").with_meta(keys::CATEGORY, "service"),
            Document::new("office opening hours").with_meta(keys::CATEGORY, "general"),
        ]
    }

    #[tokio::test]
    async fn test_search_never_exceeds_top_k() {
        let idx = index();
        idx.add_documents(&corpus()).await.unwrap();
        for k in 1..6 {
            let res = idx.search("laptop", None, k).await.unwrap();
            assert!(res.len() <= k);
        }
    }

    #[tokio::test]
    async fn test_post_filter_keeps_only_matches() {
        let idx = index();
        idx.add_documents(&corpus()).await.unwrap();
        let filter = Filter::category("product");
        let res = idx.search("laptop", Some(&filter), 2).await.unwrap();
        assert_eq!(res.len(), 2);
        assert!(res
            .iter()
            .all(|r| r.document.get_str(keys::CATEGORY) == Some("product")));
    }

    #[tokio::test]
    async fn test_post_filter_widens_past_overfetch_window() {
        let idx = index();
        let mut docs: Vec<Document> = (0..8)
            .map(|i| Document::new(format!("laptop laptop note {i}")).with_meta(keys::CATEGORY, "noise"))
            .collect();
        docs.push(Document::new("unrelated gardening tips").with_meta(keys::CATEGORY, "rare"));
        docs.push(Document::new("seasonal planting guide").with_meta(keys::CATEGORY, "rare"));
        idx.add_documents(&docs).await.unwrap();

        let res = idx
            .search("laptop", Some(&Filter::category("rare")), 2)
            .await
            .unwrap();
        assert_eq!(res.len(), 2);
        assert!(res
            .iter()
            .all(|r| r.document.get_str(keys::CATEGORY) == Some("rare")));

        let exhausted = idx
            .search("laptop", Some(&Filter::category("rare")), 5)
            .await
            .unwrap();
        assert_eq!(exhausted.len(), 2);
    }

    #[tokio::test]
    async fn test_truncate_and_restore() {
        let idx = index();
        idx.add_documents(&corpus()).await.unwrap();
        let before = idx.snapshot().unwrap();
        idx.truncate(1).unwrap();
        assert_eq!(idx.count().await.unwrap(), 1);
        idx.restore(before.clone()).unwrap();
        assert_eq!(idx.snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn test_fetch_is_exact_and_ordered() {
        let idx = index();
        idx.add_documents(&corpus()).await.unwrap();
        let docs = idx.fetch(&Filter::category("product"), 10).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].content.starts_with("laptop battery"));
        assert_eq!(idx.fetch(&Filter::category("product"), 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_does_not_mutate_documents() {
        let idx = index();
        let docs = corpus();
        idx.add_documents(&docs).await.unwrap();
        idx.search("laptop", None, 3).await.unwrap();
        let stored: Vec<Document> = idx
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|e| e.document)
            .collect();
        assert_eq!(stored, docs);
    }

    #[tokio::test]
    async fn test_reset_clears() {
        let idx = index();
        idx.add_documents(&corpus()).await.unwrap();
        assert_eq!(idx.count().await.unwrap(), 4);
        idx.reset().await.unwrap();
        assert_eq!(idx.count().await.unwrap(), 0);
    }
}
