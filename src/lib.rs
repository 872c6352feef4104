//! # Concierge
//!
//! Routes user questions to domain experts backed by a local knowledge
//! index.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────┐
//!   query ──────────────▶│    Router    │◀── recalled memory (SessionMemoryStore)
//!                        └──────┬───────┘
//!                               │ model decision, validated against
//!                               ▼ the CapabilityRegistry
//!                        ┌──────────────┐
//!                        │   Experts    │──▶ RetrievalEngine ──▶ VectorIndex
//!                        └──────┬───────┘     (over-fetch,        (sqlite | flat)
//!                               │              rerank)                 ▲
//!                               ▼                                      │
//!                        knowledge_search,                             │
//!                        ticket_creator                                │
//!                                                                      │
//!   files ──▶ IngestionPipeline (bounded worker pool, chunk once) ─────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`registry`] | Capability registry of named handlers |
//! | [`handlers`] | Handler trait, knowledge experts, formatter |
//! | [`tools`] | Tools experts call: knowledge search, ticket creation |
//! | [`router`] | Routing decision and dispatch |
//! | [`retrieval`] | Over-fetch and rerank |
//! | [`sqlite_index`] | Indexed SQLite vector store |
//! | [`flat_store`] | File-backed flat vector store |
//! | [`ingest`] | File and directory ingestion |
//! | [`extract`] | Text extraction by file type |
//! | [`memory`] | Per-user memory facts |
//! | [`session`] | Per-session turn history |
//! | [`conversation`] | Conversation log |
//! | [`model`] | Language model invocation |
//! | [`embedding`] | Embedding providers |
//! | [`scorer`] | Relevance scorer providers |
//! | [`service`] | Composition root and `process_query` |
//! | [`commands`] | CLI subcommands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema setup |

pub mod commands;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod flat_store;
pub mod handlers;
pub mod http;
pub mod ingest;
pub mod memory;
pub mod migrate;
pub mod model;
pub mod progress;
pub mod registry;
pub mod retrieval;
pub mod router;
pub mod scorer;
pub mod service;
pub mod session;
pub mod sqlite_index;
pub mod tools;
