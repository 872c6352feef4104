//! Composition root.
//!
//! [`Concierge`] wires the configured collaborators together once at
//! startup: the vector index, the retrieval engine, the memory store, and
//! a [`CapabilityRegistry`] holding the router, the configured experts and
//! the formatter. After construction the registry is frozen behind an
//! `Arc` and shared by every request.
//!
//! [`Concierge::process_query`] is the external dispatch boundary. Each
//! completed query is recorded in the session history and emitted to the
//! conversation sink.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use concierge_core::embedding::Embedder;
use concierge_core::rerank::Scorer;
use concierge_core::store::VectorIndex;
use concierge_core::{Error, Result};

use crate::config::{Config, IndexBackend};
use crate::conversation::{ConversationRecord, ConversationSink, NoopSink, SqliteConversationLog};
use crate::embedding::create_embedder;
use crate::extract::{Extractor, FileExtractor};
use crate::flat_store::FlatStore;
use crate::handlers::{HandlerContext, KnowledgeExpert, OutputFormatter};
use crate::ingest::IngestionPipeline;
use crate::memory::SessionMemoryStore;
use crate::model::{create_model, create_router_model, LanguageModel, Turn};
use crate::registry::CapabilityRegistry;
use crate::retrieval::RetrievalEngine;
use crate::router::Router;
use crate::scorer::create_scorer;
use crate::session::SessionStore;
use crate::sqlite_index::SqliteIndex;
use crate::tools::{TicketDesk, ToolRegistry};

/// Open the configured vector index backend.
pub async fn open_index(
    config: &Config,
    embedder: Arc<dyn Embedder>,
) -> anyhow::Result<Arc<dyn VectorIndex>> {
    let path = &config.index.path;
    let index: Arc<dyn VectorIndex> = match config.index.backend {
        IndexBackend::Sqlite => Arc::new(
            SqliteIndex::open(path, embedder)
                .await
                .with_context(|| format!("Failed to open sqlite index at {}", path.display()))?,
        ),
        IndexBackend::Flat => Arc::new(
            FlatStore::open(path, embedder, config.retrieval.overfetch_factor)
                .await
                .with_context(|| format!("Failed to open flat index at {}", path.display()))?,
        ),
    };
    Ok(index)
}

/// Response of one [`Concierge::process_query`] call.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub user_id: String,
    pub session_id: String,
    pub response: String,
}

/// Collaborators [`Concierge::assemble`] wires together.
pub struct Components {
    pub index: Arc<dyn VectorIndex>,
    pub scorer: Arc<dyn Scorer>,
    pub model: Arc<dyn LanguageModel>,
    pub router_model: Arc<dyn LanguageModel>,
    pub extractor: Arc<dyn Extractor>,
    pub sink: Arc<dyn ConversationSink>,
}

pub struct Concierge {
    registry: Arc<CapabilityRegistry>,
    index: Arc<dyn VectorIndex>,
    retrieval: Arc<RetrievalEngine>,
    memory: Arc<SessionMemoryStore>,
    tickets: Arc<TicketDesk>,
    extractor: Arc<dyn Extractor>,
    sessions: SessionStore,
    sink: Arc<dyn ConversationSink>,
    workers: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    recall_limit: usize,
}

impl Concierge {
    /// Build every collaborator from `config`.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = open_index(config, embedder).await?;
        let sink: Arc<dyn ConversationSink> = match &config.conversation.log_path {
            Some(path) => Arc::new(
                SqliteConversationLog::open(path)
                    .await
                    .with_context(|| format!("Failed to open conversation log at {}", path.display()))?,
            ),
            None => Arc::new(NoopSink),
        };
        let components = Components {
            index,
            scorer: create_scorer(&config.reranker)?,
            model: create_model(&config.model)?,
            router_model: create_router_model(&config.model)?,
            extractor: Arc::new(FileExtractor::new(config.extraction.ocr_command.clone())),
            sink,
        };
        Ok(Self::assemble(config, components)?)
    }

    /// Wire already-built collaborators. Registers the router first, then
    /// the configured experts in order, then the formatter. An expert
    /// naming an unknown tool is an error.
    pub fn assemble(config: &Config, parts: Components) -> Result<Self> {
        let retrieval = Arc::new(
            RetrievalEngine::new(parts.index.clone(), parts.scorer)
                .with_overfetch(config.retrieval.overfetch_factor),
        );
        let memory = Arc::new(SessionMemoryStore::new(parts.index.clone()));
        let tickets = Arc::new(TicketDesk::new());
        let tools = ToolRegistry::with_builtins(retrieval.clone(), tickets.clone(), config.retrieval.top_k);

        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(Router::new(
            parts.router_model,
            memory.clone(),
            config.memory.recall_limit,
        )))?;
        for expert in &config.experts {
            registry.register(Arc::new(KnowledgeExpert::new(
                expert.name.clone(),
                expert.description.clone(),
                expert.category.clone(),
                expert.system_prompt.clone(),
                tools.resolve(&expert.tools).map_err(|e| {
                    Error::InvalidArgument(format!("expert '{}': {}", expert.name, e))
                })?,
                expert.top_k.unwrap_or(config.retrieval.top_k),
                retrieval.clone(),
                parts.model.clone(),
            )))?;
        }
        if config.formatter.enabled {
            registry.register(Arc::new(OutputFormatter::new(parts.model.clone())))?;
        }
        info!(
            handlers = registry.len(),
            backend = parts.index.backend(),
            "capability registry ready"
        );

        Ok(Self {
            registry: Arc::new(registry),
            index: parts.index,
            retrieval,
            memory,
            tickets,
            extractor: parts.extractor,
            sessions: SessionStore::new(
                config.session.max_turns,
                config.session.max_sessions,
                Duration::from_secs(config.session.idle_timeout_secs),
            ),
            sink: parts.sink,
            workers: config.ingest.workers,
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            recall_limit: config.memory.recall_limit,
        })
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn retrieval(&self) -> &Arc<RetrievalEngine> {
        &self.retrieval
    }

    pub fn memory(&self) -> &Arc<SessionMemoryStore> {
        &self.memory
    }

    /// Service tickets opened by experts since startup.
    pub fn tickets(&self) -> &Arc<TicketDesk> {
        &self.tickets
    }

    pub fn recall_limit(&self) -> usize {
        self.recall_limit
    }

    /// A fresh ingestion pipeline writing into this instance's index.
    pub fn pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            self.index.clone(),
            self.extractor.clone(),
            self.workers,
            self.chunk_size,
            self.chunk_overlap,
        )
    }

    /// Route one query and return the handler's response.
    ///
    /// Missing ids are replaced by fresh UUIDs and returned in the
    /// [`QueryResponse`] so the caller can continue the session.
    pub async fn process_query(
        &self,
        text: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<QueryResponse> {
        if text.trim().is_empty() {
            return Err(Error::InvalidArgument("query is empty".to_string()));
        }
        let user_id = user_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let session_id = session_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

        let session = self.sessions.context(&session_id, &user_id);
        let ctx = HandlerContext {
            registry: &self.registry,
            session: &session,
        };
        let router = self.registry.get(Router::NAME)?;
        let response = router.process(text, &ctx).await.map_err(|e| {
            error!(session_id = %session_id, error = %e, "query failed");
            e
        })?;

        self.sessions.record(
            &session_id,
            Turn {
                query: text.to_string(),
                response: response.clone(),
            },
        );
        let record = ConversationRecord::new(&session_id, &user_id, text, &response);
        if let Err(e) = self.sink.record(&record).await {
            warn!(session_id = %session_id, error = %e, "conversation log write failed");
        }

        Ok(QueryResponse {
            user_id,
            session_id,
            response,
        })
    }

    /// Blocking variant of [`process_query`](Self::process_query) for
    /// callers outside an async runtime. Called from within one it returns
    /// [`Error::InvalidArgument`].
    pub fn process_query_blocking(
        &self,
        text: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<QueryResponse> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::InvalidArgument(
                "process_query_blocking called from within an async runtime; use process_query".to_string(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::backend)?;
        runtime.block_on(self.process_query(text, user_id, session_id))
    }

    /// Like [`process_query`](Self::process_query), but any failure is
    /// rendered as the user-facing apology.
    pub async fn respond(&self, text: &str, user_id: Option<&str>, session_id: Option<&str>) -> String {
        match self.process_query(text, user_id, session_id).await {
            Ok(r) => r.response,
            Err(e) => e.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DisabledModel;
    use async_trait::async_trait;
    use concierge_core::embedding::HashEmbedder;
    use concierge_core::rerank::TermOverlapScorer;
    use concierge_core::store::flat::FlatIndex;
    use std::sync::Mutex;

    struct FixedModel(&'static str);

    #[async_trait]
    impl LanguageModel for FixedModel {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _: &str, _: &str, _: &crate::model::SessionContext) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct CapturingSink(Mutex<Vec<ConversationRecord>>);

    #[async_trait]
    impl ConversationSink for CapturingSink {
        async fn record(&self, record: &ConversationRecord) -> Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn concierge(router_model: Arc<dyn LanguageModel>, sink: Arc<dyn ConversationSink>) -> Concierge {
        let components = Components {
            index: Arc::new(FlatIndex::new(Arc::new(HashEmbedder::new(32)))),
            scorer: Arc::new(TermOverlapScorer),
            model: Arc::new(FixedModel("expert answer")),
            router_model,
            extractor: Arc::new(FileExtractor::default()),
            sink,
        };
        Concierge::assemble(&Config::minimal(), components).unwrap()
    }

    #[test]
    fn registry_holds_router_experts_and_formatter() {
        let c = concierge(Arc::new(DisabledModel), Arc::new(NoopSink));
        let names: Vec<&str> = c.registry().list_all().iter().map(|h| h.name()).collect();
        assert_eq!(
            names,
            vec![
                "router_agent",
                "knowledge_base_agent",
                "product_expert",
                "customer_service_agent",
                "tech_support_agent",
                "output_formatter_agent",
            ]
        );
    }

    #[tokio::test]
    async fn process_query_assigns_ids_and_logs() {
        let sink = Arc::new(CapturingSink::default());
        let c = concierge(Arc::new(FixedModel("product_expert")), sink.clone());
        let r = c.process_query("what does it cost?", None, Some("s1")).await.unwrap();
        assert_eq!(r.session_id, "s1");
        assert!(!r.user_id.is_empty());
        assert_eq!(r.response, "expert answer");

        let records = sink.0.lock().unwrap().clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query, "what does it cost?");
        assert_eq!(records[0].response, "expert answer");
        assert_eq!(records[0].session_id, "s1");
    }

    #[tokio::test]
    async fn failures_become_an_apology() {
        let c = concierge(Arc::new(DisabledModel), Arc::new(NoopSink));
        let text = c.respond("hello", Some("u1"), Some("s1")).await;
        assert!(text.starts_with("Sorry"));
        assert!(text.contains("disabled"));
    }

    #[test]
    fn blocking_variant_matches_async() {
        let c = concierge(Arc::new(FixedModel("no match here")), Arc::new(NoopSink));
        let r = c.process_query_blocking("hi", Some("u1"), Some("s1")).unwrap();
        assert_eq!(r.response, crate::router::UNDETERMINED_MESSAGE);
    }

    #[tokio::test]
    async fn blocking_variant_refuses_to_run_inside_a_runtime() {
        let c = concierge(Arc::new(FixedModel("no match here")), Arc::new(NoopSink));
        let err = c.process_query_blocking("hi", Some("u1"), Some("s1")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn unknown_expert_tool_is_rejected() {
        let mut config = Config::minimal();
        config.experts[0].tools.push("send_email".to_string());
        let components = Components {
            index: Arc::new(FlatIndex::new(Arc::new(HashEmbedder::new(32)))),
            scorer: Arc::new(TermOverlapScorer),
            model: Arc::new(DisabledModel),
            router_model: Arc::new(DisabledModel),
            extractor: Arc::new(FileExtractor::default()),
            sink: Arc::new(NoopSink),
        };
        let err = Concierge::assemble(&config, components).err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn customer_service_can_open_tickets() {
        let c = concierge(Arc::new(DisabledModel), Arc::new(NoopSink));
        let service = c.registry().get("customer_service_agent").unwrap();
        assert!(service.capabilities().contains(&"ticket_creator".to_string()));
        assert!(c.tickets().tickets().is_empty());
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let c = concierge(Arc::new(DisabledModel), Arc::new(NoopSink));
        let err = c.process_query("  ", None, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
