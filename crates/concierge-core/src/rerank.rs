//! Second-pass relevance scoring over an over-fetched candidate pool.
//!
//! The first-stage similarity search is cheap and coarse; a [`Scorer`]
//! is expensive and accurate. [`rerank`] scores every candidate against
//! the query, sorts descending (stable, so ties keep retrieval order),
//! and truncates with [`rerank_len`].
//!
//! If scoring fails for any candidate the whole batch falls back to the
//! first `top_k` candidates in their original order, and the outcome is
//! reported as [`RerankOutcome::Degraded`] rather than an error.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::embedding::tokenize;
use crate::error::{Error, Result};
use crate::models::Document;

/// Pairwise relevance scorer. Higher is more relevant.
///
/// Calls must be independent of each other: scoring the same pair twice
/// gives the same answer.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, query: &str, candidate: &str) -> Result<f32>;

    /// Score a batch. The default scores one candidate at a time; remote
    /// scorers override this to send a single request.
    async fn score_batch(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(candidates.len());
        for c in candidates {
            scores.push(self.score(query, c).await?);
        }
        Ok(scores)
    }
}

/// Length of a reranked set for a pool of `pool` candidates when the
/// caller asked for `top_k`.
///
/// `max(min(pool, 3), top_k / 3)`, capped at `pool`.
///
/// ```rust
/// use concierge_core::rerank::rerank_len;
///
/// assert_eq!(rerank_len(10, 5), 3);
/// assert_eq!(rerank_len(20, 12), 4);
/// assert_eq!(rerank_len(2, 5), 2);
/// assert_eq!(rerank_len(4, 30), 4);
/// ```
pub fn rerank_len(pool: usize, top_k: usize) -> usize {
    pool.min(3).max(top_k / 3).min(pool)
}

/// How a [`RerankedSet`] was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RerankOutcome {
    /// Every candidate was scored and sorted.
    Ranked,
    /// Scoring failed; the set holds the first `top_k` unscored candidates.
    Degraded { reason: String },
    /// The candidate pool was empty; the scorer was never called.
    Empty,
}

/// A document in a reranked set.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDocument {
    pub document: Document,
    /// Relevance score, absent when the set is degraded.
    pub score: Option<f32>,
}

/// Final evidence set returned by the retrieval engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankedSet {
    pub items: Vec<RankedDocument>,
    pub outcome: RerankOutcome,
}

impl RerankedSet {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            outcome: RerankOutcome::Empty,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.outcome, RerankOutcome::Degraded { .. })
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.items.iter().map(|i| &i.document)
    }
}

/// Score, sort, and truncate `pool` for `query`.
pub async fn rerank(
    scorer: &dyn Scorer,
    query: &str,
    pool: Vec<Document>,
    top_k: usize,
) -> RerankedSet {
    if pool.is_empty() {
        return RerankedSet::empty();
    }

    let texts: Vec<&str> = pool.iter().map(|d| d.content.as_str()).collect();
    let scores = scorer
        .score_batch(query, &texts)
        .await
        .and_then(|scores| check_scores(scores, pool.len()));

    let scores = match scores {
        Ok(s) => s,
        Err(e) => {
            warn!(scorer = scorer.name(), error = %e, "rerank degraded, keeping retrieval order");
            let items = pool
                .into_iter()
                .take(top_k)
                .map(|document| RankedDocument {
                    document,
                    score: None,
                })
                .collect();
            return RerankedSet {
                items,
                outcome: RerankOutcome::Degraded {
                    reason: e.to_string(),
                },
            };
        }
    };

    let keep = rerank_len(pool.len(), top_k);
    let mut items: Vec<RankedDocument> = pool
        .into_iter()
        .zip(scores)
        .map(|(document, score)| RankedDocument {
            document,
            score: Some(score),
        })
        .collect();
    // sort_by is stable: equal scores keep retrieval order.
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    items.truncate(keep);

    debug!(scorer = scorer.name(), kept = items.len(), "reranked candidates");
    RerankedSet {
        items,
        outcome: RerankOutcome::Ranked,
    }
}

fn check_scores(scores: Vec<f32>, expected: usize) -> Result<Vec<f32>> {
    if scores.len() != expected {
        return Err(Error::Scoring(format!(
            "scorer returned {} scores for {} candidates",
            scores.len(),
            expected
        )));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(Error::Scoring(format!("non-finite score {}", bad)));
    }
    Ok(scores)
}

/// Offline scorer: fraction of distinct query terms present in the candidate.
pub struct TermOverlapScorer;

#[async_trait]
impl Scorer for TermOverlapScorer {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score(&self, query: &str, candidate: &str) -> Result<f32> {
        let terms: HashSet<String> = tokenize(query).collect();
        if terms.is_empty() {
            return Ok(0.0);
        }
        let present: HashSet<String> = tokenize(candidate).collect();
        let hits = terms.iter().filter(|t| present.contains(*t)).count();
        Ok(hits as f32 / terms.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(texts: &[&str]) -> Vec<Document> {
        texts.iter().map(|t| Document::new(*t)).collect()
    }

    /// Scores by looking the candidate up in a fixed table.
    struct TableScorer(Vec<(&'static str, f32)>);

    #[async_trait]
    impl Scorer for TableScorer {
        fn name(&self) -> &str {
            "table"
        }
        async fn score(&self, _q: &str, candidate: &str) -> Result<f32> {
            self.0
                .iter()
                .find(|(t, _)| *t == candidate)
                .map(|(_, s)| *s)
                .ok_or_else(|| Error::Scoring(format!("no score for {candidate}")))
        }
    }

    struct CountingScorer(AtomicUsize);

    #[async_trait]
    impl Scorer for CountingScorer {
        fn name(&self) -> &str {
            "counting"
        }
        async fn score(&self, _q: &str, _c: &str) -> Result<f32> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(1.0)
        }
    }

    #[test]
    fn test_rerank_len_policy() {
        for n in 0..12usize {
            for k in 1..40usize {
                let expected = n.min(3).max(k / 3).min(n);
                assert_eq!(rerank_len(n, k), expected);
                assert!(rerank_len(n, k) <= n);
            }
        }
        assert_eq!(rerank_len(0, 9), 0);
        assert_eq!(rerank_len(1, 1), 1);
    }

    #[tokio::test]
    async fn test_sorts_descending_and_truncates() {
        let scorer = TableScorer(vec![("a", 0.1), ("b", 0.9), ("c", 0.5), ("d", 0.7)]);
        let set = rerank(&scorer, "q", pool(&["a", "b", "c", "d"]), 2).await;
        assert_eq!(set.outcome, RerankOutcome::Ranked);
        let texts: Vec<&str> = set.documents().map(|d| d.content.as_str()).collect();
        assert_eq!(texts, vec!["b", "d", "c"]);
    }

    #[tokio::test]
    async fn test_ties_keep_retrieval_order() {
        let scorer = TableScorer(vec![("x", 0.5), ("y", 0.5), ("z", 0.5), ("w", 0.9)]);
        let set = rerank(&scorer, "q", pool(&["x", "y", "z", "w"]), 3).await;
        let texts: Vec<&str> = set.documents().map(|d| d.content.as_str()).collect();
        assert_eq!(texts, vec!["w", "x", "y"]);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_first_top_k() {
        let scorer = TableScorer(vec![("a", 0.1)]);
        let set = rerank(&scorer, "q", pool(&["a", "b", "c", "d", "e"]), 4).await;
        assert!(set.is_degraded());
        let texts: Vec<&str> = set.documents().map(|d| d.content.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
        assert!(set.items.iter().all(|i| i.score.is_none()));
    }

    #[tokio::test]
    async fn test_empty_pool_skips_scorer() {
        let scorer = CountingScorer(AtomicUsize::new(0));
        let set = rerank(&scorer, "q", Vec::new(), 5).await;
        assert_eq!(set.outcome, RerankOutcome::Empty);
        assert_eq!(scorer.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_term_overlap_scorer() {
        let s = TermOverlapScorer;
        let full = s.score("refund policy", "Our refund policy is simple").await.unwrap();
        let half = s.score("refund policy", "refund desk hours").await.unwrap();
        let none = s.score("refund policy", "opening hours").await.unwrap();
        assert_eq!(full, 1.0);
        assert_eq!(half, 0.5);
        assert_eq!(none, 0.0);
    }
}
