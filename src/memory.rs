//! Per-user memory facts stored alongside the knowledge base.
//!
//! A fact is an ordinary [`Document`] tagged `category = "user_memory"`,
//! `user_id` and `info_type`. Facts are written only when a user asks for
//! something to be remembered, never expire, and are recalled by exact
//! metadata match rather than by similarity. Repeated facts accumulate.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use concierge_core::models::{keys, Document, Filter};
use concierge_core::store::VectorIndex;
use concierge_core::{Error, Result};

pub const MEMORY_CATEGORY: &str = "user_memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoType {
    Preference,
    Profile,
    General,
}

impl InfoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoType::Preference => "preference",
            InfoType::Profile => "profile",
            InfoType::General => "general",
        }
    }
}

impl fmt::Display for InfoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InfoType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preference" => Ok(InfoType::Preference),
            "profile" => Ok(InfoType::Profile),
            "general" => Ok(InfoType::General),
            other => Err(Error::InvalidArgument(format!(
                "unknown info type '{}'; expected preference, profile or general",
                other
            ))),
        }
    }
}

pub struct SessionMemoryStore {
    index: Arc<dyn VectorIndex>,
}

impl SessionMemoryStore {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }

    /// Store one fact for `user_id` and return a confirmation for the user.
    pub async fn remember(&self, info: &str, user_id: &str, info_type: InfoType) -> Result<String> {
        let info = info.trim();
        if info.is_empty() {
            return Err(Error::InvalidArgument("nothing to remember".to_string()));
        }
        let fact = Document::new(info)
            .with_meta(keys::CATEGORY, MEMORY_CATEGORY)
            .with_meta(keys::USER_ID, user_id)
            .with_meta(keys::INFO_TYPE, info_type.as_str());
        self.index.add_documents(&[fact]).await?;
        info!(user_id, info_type = %info_type, "remembered fact");
        Ok(format!("I'll remember that: {}", info))
    }

    /// Up to `limit` facts for `user_id`, one `- {info_type}: {content}`
    /// line each. Empty string when the user has none.
    pub async fn recall(&self, user_id: &str, limit: usize) -> Result<String> {
        let filter = Filter::category(MEMORY_CATEGORY).eq(keys::USER_ID, user_id);
        let facts = self.index.fetch(&filter, limit).await?;
        debug!(user_id, facts = facts.len(), "recalled memory");

        let lines: Vec<String> = facts
            .iter()
            .map(|d| {
                let info_type = d.get_str(keys::INFO_TYPE).unwrap_or("general");
                format!("- {}: {}", info_type, d.content)
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::embedding::HashEmbedder;
    use concierge_core::store::flat::FlatIndex;

    fn store() -> SessionMemoryStore {
        SessionMemoryStore::new(Arc::new(FlatIndex::new(Arc::new(HashEmbedder::new(32)))))
    }

    #[tokio::test]
    async fn remember_then_recall_per_user() {
        let mem = store();
        let confirm = mem
            .remember("prefers email contact", "u1", InfoType::Preference)
            .await
            .unwrap();
        assert!(confirm.contains("prefers email contact"));

        let recalled = mem.recall("u1", 10).await.unwrap();
        assert!(recalled.contains("preference: prefers email contact"));
        assert_eq!(mem.recall("u2", 10).await.unwrap(), "");
    }

    #[tokio::test]
    async fn facts_accumulate_and_recall_is_bounded() {
        let mem = store();
        for _ in 0..3 {
            mem.remember("likes tea", "u1", InfoType::General).await.unwrap();
        }
        mem.remember("lives in Oslo", "u1", InfoType::Profile).await.unwrap();

        let all = mem.recall("u1", 10).await.unwrap();
        assert_eq!(all.lines().count(), 4);
        assert_eq!(all.lines().filter(|l| *l == "- general: likes tea").count(), 3);
        assert_eq!(mem.recall("u1", 2).await.unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn blank_fact_is_rejected() {
        let err = store().remember("   ", "u1", InfoType::General).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn info_type_parsing() {
        assert_eq!("Preference".parse::<InfoType>().unwrap(), InfoType::Preference);
        assert_eq!("profile".parse::<InfoType>().unwrap(), InfoType::Profile);
        assert!("mood".parse::<InfoType>().is_err());
    }
}
