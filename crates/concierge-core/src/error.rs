//! Error taxonomy shared by every Concierge component.
//!
//! Batch-level problems (a single file failing extraction, a scorer
//! failing during rerank) are *contained*: they are collected into
//! reports or turned into degraded outcomes and never abort the batch.
//! Everything else is surfaced to the caller as an [`Error`].

use thiserror::Error;

/// Result alias used throughout Concierge.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown handler name, missing file, or an empty registry lookup.
    #[error("not found: {0}")]
    NotFound(String),

    /// A handler with this name is already registered.
    #[error("handler '{0}' is already registered")]
    DuplicateName(String),

    /// The vector index, database, or a remote service is unreachable.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Text extraction failed for one file.
    #[error("extraction failed for {path}: {message}")]
    Extraction { path: String, message: String },

    /// The language model returned an error. Propagated unmodified.
    #[error("model invocation failed: {0}")]
    Model(String),

    /// The relevance scorer failed for a candidate.
    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Wrap any displayable backend error (sqlx, I/O, HTTP).
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Error::BackendUnavailable(err.to_string())
    }

    /// Short apology shown to the user when a request cannot be served.
    ///
    /// Always a complete sentence followed by the error description, so
    /// callers never show partial output.
    pub fn user_message(&self) -> String {
        format!("Sorry, I couldn't complete your request. {}", self)
    }
}
