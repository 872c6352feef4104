//! Conversation log.
//!
//! Every completed query is emitted as a [`ConversationRecord`] to a
//! [`ConversationSink`]. The SQLite sink keeps one row per record in the
//! `conversations` table; [`NoopSink`] drops them.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::info;

use concierge_core::{Error, Result};

use crate::{db, migrate};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationRecord {
    pub session_id: String,
    pub user_id: String,
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(session_id: &str, user_id: &str, query: &str, response: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            query: query.to_string(),
            response: response.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ConversationSink: Send + Sync {
    async fn record(&self, record: &ConversationRecord) -> Result<()>;
}

pub struct NoopSink;

#[async_trait]
impl ConversationSink for NoopSink {
    async fn record(&self, _record: &ConversationRecord) -> Result<()> {
        Ok(())
    }
}

pub struct SqliteConversationLog {
    pool: SqlitePool,
}

impl SqliteConversationLog {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .map_err(|e| Error::backend(format!("{:#}", e)))?;
        migrate::migrate_conversations(&pool)
            .await
            .map_err(Error::backend)?;
        info!(path = %path.display(), "opened conversation log");
        Ok(Self { pool })
    }

    /// Up to `limit` records of a session, newest first.
    pub async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            "SELECT session_id, user_id, user_query, response, timestamp \
             FROM conversations WHERE session_id = ? \
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::backend)?;

        rows.iter()
            .map(|row| {
                let ts: String = row.get("timestamp");
                let timestamp = DateTime::parse_from_rfc3339(&ts)
                    .map_err(Error::backend)?
                    .with_timezone(&Utc);
                Ok(ConversationRecord {
                    session_id: row.get("session_id"),
                    user_id: row.get("user_id"),
                    query: row.get("user_query"),
                    response: row.get("response"),
                    timestamp,
                })
            })
            .collect()
    }

    pub async fn count(&self) -> Result<usize> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::backend)?;
        Ok(n as usize)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ConversationSink for SqliteConversationLog {
    async fn record(&self, record: &ConversationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations (session_id, user_id, user_query, response, timestamp) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.session_id)
        .bind(&record.user_id)
        .bind(&record.query)
        .bind(&record.response)
        .bind(record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await
        .map_err(Error::backend)?;
        Ok(())
    }
}
