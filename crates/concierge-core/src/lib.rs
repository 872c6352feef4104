//! # Concierge Core
//!
//! Shared, I/O-free logic for Concierge: the document and filter model,
//! the character chunker, the [`VectorIndex`](store::VectorIndex) trait
//! with an in-memory flat backend, the embedding trait, and the rerank
//! policy used by the retrieval engine.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network
//! dependencies. Persistent backends and model providers live in the
//! `concierge` application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod rerank;
pub mod store;

pub use error::{Error, Result};
