//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the one storage contract the retrieval
//! engine, ingestion pipeline, and session memory store depend on. Two
//! backends implement it:
//!
//! - an indexed SQLite store (app crate) that translates a [`Filter`]
//!   into native `json_extract` predicates;
//! - a flat array store ([`flat::FlatIndex`], persisted by the app crate)
//!   with no native filtering, which over-fetches and post-filters.
//!
//! Callers never see the difference: both accept the same [`Filter`].
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`add_documents`](VectorIndex::add_documents) | Embed and append documents |
//! | [`search`](VectorIndex::search) | Filtered similarity search, at most `top_k` results |
//! | [`fetch`](VectorIndex::fetch) | Exact filter match, insertion order, no similarity |
//! | [`count`](VectorIndex::count) | Number of stored documents |
//! | [`reset`](VectorIndex::reset) | Delete everything |
//!
//! Implementations must be `Send + Sync` and must never mutate a stored
//! document.

pub mod flat;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Document, Filter, ScoredDocument};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend identifier for logs (`"sqlite"`, `"flat"`).
    fn backend(&self) -> &'static str;

    /// Embed and store documents. Returns how many were written.
    async fn add_documents(&self, docs: &[Document]) -> Result<usize>;

    /// Similarity search for `query`, most similar first.
    ///
    /// Returns at most `top_k` documents, all matching `filter`.
    async fn search(
        &self,
        query: &str,
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>>;

    /// Return up to `limit` documents matching `filter` exactly, in
    /// insertion order.
    async fn fetch(&self, filter: &Filter, limit: usize) -> Result<Vec<Document>>;

    async fn count(&self) -> Result<usize>;

    /// Remove every stored document.
    async fn reset(&self) -> Result<()>;
}
