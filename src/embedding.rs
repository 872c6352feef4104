//! Embedding providers.
//!
//! - **[`HashEmbedder`]** (core): deterministic feature hashing, offline.
//! - **[`OpenAIEmbedder`]**: any OpenAI-compatible `POST {base_url}/embeddings`
//!   endpoint, batched, with retry and backoff.
//!
//! Use [`create_embedder`] to build the provider named in config.

use std::sync::Arc;

use async_trait::async_trait;

use concierge_core::embedding::{Embedder, HashEmbedder};
use concierge_core::{Error, Result};

use crate::config::EmbeddingConfig;
use crate::http;

/// Embedding provider using the OpenAI API (or a compatible server).
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key: http::api_key("OPENAI_API_KEY")?,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = http::post_json(
                &self.client,
                &self.url,
                Some(&self.api_key),
                &body,
                self.max_retries,
            )
            .await
            .map_err(Error::backend)?;
            out.extend(parse_embeddings(&json, batch.len())?);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_embeddings(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let invalid = |what: &str| Error::BackendUnavailable(format!("invalid embeddings response: {}", what));
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    if indexed.len() != expected {
        return Err(invalid("wrong number of embeddings"));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the embedder named by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.effective_dims()))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let v = parse_embeddings(&json, 2).unwrap();
        assert_eq!(v, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn parse_rejects_missing_data() {
        assert!(parse_embeddings(&serde_json::json!({}), 1).is_err());
        let short = serde_json::json!({"data": [{"embedding": [1.0]}]});
        assert!(parse_embeddings(&short, 2).is_err());
    }

    #[test]
    fn hash_provider_uses_configured_dims() {
        let cfg = EmbeddingConfig {
            dims: Some(48),
            ..EmbeddingConfig::default()
        };
        let e = create_embedder(&cfg).unwrap();
        assert_eq!(e.dims(), 48);
        assert_eq!(e.model_name(), "hash");
    }
}
