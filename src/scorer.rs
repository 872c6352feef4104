//! Relevance scorers for the rerank step.
//!
//! - `lexical`: [`TermOverlapScorer`] from the core crate, offline.
//! - `http`: [`HttpScorer`], a remote cross-encoder. It posts
//!   `{"query": "...", "texts": [...]}` and expects
//!   `[{"index": 0, "score": 0.93}, ...]` back, one entry per text.

use std::sync::Arc;

use async_trait::async_trait;

use concierge_core::rerank::{Scorer, TermOverlapScorer};
use concierge_core::{Error, Result};

use crate::config::RerankerConfig;
use crate::http;

pub struct HttpScorer {
    url: String,
    client: reqwest::Client,
}

impl HttpScorer {
    pub fn new(url: String, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            url,
            client: http::client(timeout_secs)?,
        })
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    fn name(&self) -> &str {
        "http"
    }

    async fn score(&self, query: &str, candidate: &str) -> Result<f32> {
        let scores = self.score_batch(query, &[candidate]).await?;
        scores
            .into_iter()
            .next()
            .ok_or_else(|| Error::Scoring("empty rerank response".to_string()))
    }

    async fn score_batch(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>> {
        let body = serde_json::json!({ "query": query, "texts": candidates });
        // No retries: a failed batch degrades the rerank instead.
        let json = http::post_json(&self.client, &self.url, None, &body, 0)
            .await
            .map_err(|e| Error::Scoring(e.to_string()))?;
        parse_scores(&json, candidates.len())
    }
}

fn parse_scores(json: &serde_json::Value, expected: usize) -> Result<Vec<f32>> {
    let items = json
        .as_array()
        .ok_or_else(|| Error::Scoring("rerank response is not an array".to_string()))?;
    let mut scores = vec![None; expected];
    for item in items {
        let index = item.get("index").and_then(|i| i.as_u64());
        let score = item.get("score").and_then(|s| s.as_f64());
        match (index, score) {
            (Some(i), Some(s)) if (i as usize) < expected => scores[i as usize] = Some(s as f32),
            _ => return Err(Error::Scoring(format!("malformed rerank entry: {}", item))),
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| Error::Scoring(format!("no score for candidate {}", i))))
        .collect()
}

/// Create the scorer named by `reranker.provider`.
pub fn create_scorer(config: &RerankerConfig) -> anyhow::Result<Arc<dyn Scorer>> {
    match config.provider.as_str() {
        "lexical" => Ok(Arc::new(TermOverlapScorer)),
        "http" => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("reranker.url required for http provider"))?;
            Ok(Arc::new(HttpScorer::new(url, config.timeout_secs)?))
        }
        other => anyhow::bail!("Unknown reranker provider: {}", other),
    }
}
