//! Retrieval engine: over-fetch, rerank, truncate.
//!
//! ```text
//! SearchQuery ──▶ VectorIndex.search(top_k × overfetch, category filter)
//!                          │
//!                    empty? ──yes──▶ RerankedSet::empty()   (scorer never called)
//!                          │
//!                          ▼
//!                 rerank(scorer) ──▶ max(min(n, 3), top_k / 3) items
//! ```
//!
//! The category becomes a [`Filter`](concierge_core::models::Filter); each
//! backend applies it in its own way. Per-user memory facts share the
//! index but are never evidence: every search also carries
//! `category != user_memory`.

use std::sync::Arc;

use tracing::{debug, error};

use concierge_core::models::{keys, SearchQuery};
use concierge_core::rerank::{rerank, RerankedSet, Scorer};
use concierge_core::store::VectorIndex;
use concierge_core::Result;

use crate::memory::MEMORY_CATEGORY;

pub struct RetrievalEngine {
    index: Arc<dyn VectorIndex>,
    scorer: Arc<dyn Scorer>,
    overfetch: usize,
}

impl RetrievalEngine {
    pub fn new(index: Arc<dyn VectorIndex>, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            index,
            scorer,
            overfetch: 2,
        }
    }

    /// Candidate pool multiplier. Values below 2 are raised to 2.
    pub fn with_overfetch(mut self, factor: usize) -> Self {
        self.overfetch = factor.max(2);
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<RerankedSet> {
        query.validate()?;
        let filter = query
            .filter()
            .unwrap_or_default()
            .ne(keys::CATEGORY, MEMORY_CATEGORY);
        let pool_size = query.top_k.saturating_mul(self.overfetch);

        let pool = self
            .index
            .search(&query.text, Some(&filter), pool_size)
            .await
            .map_err(|e| {
                error!(backend = self.index.backend(), error = %e, "vector search failed");
                e
            })?;
        debug!(
            backend = self.index.backend(),
            category = query.category.as_deref().unwrap_or("-"),
            requested = query.top_k,
            pool = pool.len(),
            "candidate pool fetched"
        );

        if pool.is_empty() {
            return Ok(RerankedSet::empty());
        }

        let docs = pool.into_iter().map(|s| s.document).collect();
        Ok(rerank(self.scorer.as_ref(), &query.text, docs, query.top_k).await)
    }
}
