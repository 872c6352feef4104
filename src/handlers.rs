//! Query handlers.
//!
//! A [`Handler`] is a named unit of query-processing logic. Every handler
//! has a [`HandlerKind`]:
//!
//! - **router**: picks another handler for the query ([`crate::router::Router`]);
//! - **expert**: answers from retrieved evidence ([`KnowledgeExpert`]);
//! - **formatter**: rewrites text into a clean presentation ([`OutputFormatter`]).
//!
//! Handlers receive a [`HandlerContext`] at call time carrying the
//! registry and the session. A router finds its candidates through the
//! context rather than owning the registry it is registered in.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use concierge_core::models::{keys, SearchQuery};
use concierge_core::Result;

use crate::model::{LanguageModel, SessionContext};
use crate::registry::CapabilityRegistry;
use crate::retrieval::RetrievalEngine;
use crate::tools::{parse_tool_call, tool_block, Tool, ToolContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Router,
    Expert,
    Formatter,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandlerKind::Router => "router",
            HandlerKind::Expert => "expert",
            HandlerKind::Formatter => "formatter",
        })
    }
}

/// What a handler sees of the world while processing one query.
pub struct HandlerContext<'a> {
    pub registry: &'a CapabilityRegistry,
    pub session: &'a SessionContext,
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Unique name; the handler's identity in the registry.
    fn name(&self) -> &str;

    fn kind(&self) -> HandlerKind;

    /// One line shown to the router when it picks a handler.
    fn description(&self) -> &str;

    /// Names of the tools this handler uses.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    async fn process(&self, query: &str, ctx: &HandlerContext<'_>) -> Result<String>;
}

/// Serializable handler summary for `concierge handlers`.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerInfo {
    pub name: String,
    pub kind: HandlerKind,
    pub description: String,
    pub capabilities: Vec<String>,
}

impl HandlerInfo {
    pub fn of(handler: &dyn Handler) -> Self {
        Self {
            name: handler.name().to_string(),
            kind: handler.kind(),
            description: handler.description().to_string(),
            capabilities: handler.capabilities(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// KnowledgeExpert
// ═══════════════════════════════════════════════════════════════════════

/// An expert that answers from the knowledge base.
///
/// Retrieves evidence for the query (restricted to its category, if it
/// has one), numbers the passages, and asks the model to answer from
/// them. When the expert has tools and the model replies with a tool
/// call, the tool runs and the model is asked once more with its output.
pub struct KnowledgeExpert {
    name: String,
    description: String,
    category: Option<String>,
    system_prompt: String,
    tools: Vec<Arc<dyn Tool>>,
    top_k: usize,
    retrieval: Arc<RetrievalEngine>,
    model: Arc<dyn LanguageModel>,
}

impl KnowledgeExpert {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        description: String,
        category: Option<String>,
        system_prompt: String,
        tools: Vec<Arc<dyn Tool>>,
        top_k: usize,
        retrieval: Arc<RetrievalEngine>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let system_prompt = if tools.is_empty() {
            system_prompt
        } else {
            format!("{}\n\n{}", system_prompt, tool_block(&tools))
        };
        Self {
            name,
            description,
            category,
            system_prompt,
            tools,
            top_k,
            retrieval,
            model,
        }
    }

    /// Build the user message: numbered evidence followed by the question.
    pub fn compose_message(query: &str, evidence: &[(Option<&str>, &str)]) -> String {
        let mut msg = String::from("Context:\n");
        if evidence.is_empty() {
            msg.push_str("(no relevant documents found)\n");
        }
        for (i, (source, content)) in evidence.iter().enumerate() {
            match source {
                Some(s) => msg.push_str(&format!("[{}] ({}) {}\n", i + 1, s, content.trim())),
                None => msg.push_str(&format!("[{}] {}\n", i + 1, content.trim())),
            }
        }
        msg.push_str(&format!("\nQuestion: {}", query));
        msg
    }
}

#[async_trait]
impl Handler for KnowledgeExpert {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Expert
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn capabilities(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    async fn process(&self, query: &str, ctx: &HandlerContext<'_>) -> Result<String> {
        let mut search = SearchQuery::new(query, self.top_k);
        search.category = self.category.clone();
        let evidence = self.retrieval.search(&search).await?;
        debug!(
            expert = %self.name,
            evidence = evidence.len(),
            degraded = evidence.is_degraded(),
            "retrieved evidence"
        );

        let passages: Vec<(Option<&str>, &str)> = evidence
            .documents()
            .map(|d| (d.get_str(keys::SOURCE), d.content.as_str()))
            .collect();
        let message = Self::compose_message(query, &passages);
        let reply = self
            .model
            .complete(&self.system_prompt, &message, ctx.session)
            .await?;
        if self.tools.is_empty() {
            return Ok(reply);
        }

        let Some(call) = parse_tool_call(&reply) else {
            return Ok(reply);
        };
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.tool) else {
            warn!(expert = %self.name, tool = %call.tool, "model asked for a tool this expert lacks");
            return Ok(reply);
        };
        let tool_ctx = ToolContext {
            session: ctx.session,
            category: self.category.as_deref(),
        };
        let output = tool.execute(call.input, &tool_ctx).await?;
        info!(expert = %self.name, tool = tool.name(), "tool executed");

        let follow_up = format!(
            "{}\n\nTool {} returned:\n{}\n\nAnswer the question using this result.",
            message,
            tool.name(),
            output
        );
        self.model
            .complete(&self.system_prompt, &follow_up, ctx.session)
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// OutputFormatter
// ═══════════════════════════════════════════════════════════════════════

const FORMATTER_PROMPT: &str = "You format answers for end users. Rewrite the given text as clear, \
well-structured prose or lists. Keep every fact; add nothing new.";

/// Rewrites text into a clean, structured presentation.
pub struct OutputFormatter {
    model: Arc<dyn LanguageModel>,
}

impl OutputFormatter {
    pub const NAME: &'static str = "output_formatter_agent";

    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Handler for OutputFormatter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Formatter
    }

    fn description(&self) -> &str {
        "Organizes and formats data or answers into clean, structured output"
    }

    async fn process(&self, query: &str, ctx: &HandlerContext<'_>) -> Result<String> {
        self.model.complete(FORMATTER_PROMPT, query, ctx.session).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::embedding::HashEmbedder;
    use concierge_core::models::Document;
    use concierge_core::rerank::TermOverlapScorer;
    use concierge_core::store::flat::FlatIndex;
    use concierge_core::store::VectorIndex;
    use crate::tools::{TicketDesk, ToolRegistry};
    use std::sync::Mutex;

    /// Echoes the user message back and remembers the system prompt.
    struct EchoModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, system: &str, user: &str, _s: &SessionContext) -> Result<String> {
            self.prompts.lock().unwrap().push(system.to_string());
            Ok(user.to_string())
        }
    }

    #[test]
    fn compose_message_numbers_passages() {
        let msg = KnowledgeExpert::compose_message("q?", &[(Some("a.md"), " one "), (None, "two")]);
        assert_eq!(msg, "Context:\n[1] (a.md) one\n[2] two\n\nQuestion: q?");
        let empty = KnowledgeExpert::compose_message("q?", &[]);
        assert!(empty.contains("no relevant documents"));
    }

    #[tokio::test]
    async fn expert_answers_from_its_category_only() {
        let index = Arc::new(FlatIndex::new(Arc::new(HashEmbedder::new(64))));
        index
            .add_documents(&[
                Document::new("laptop warranty is two years").with_meta(keys::CATEGORY, "product"),
                Document::new("laptop returns within thirty days").with_meta(keys::CATEGORY, "service"),
            ])
            .await
            .unwrap();
        let retrieval = Arc::new(RetrievalEngine::new(index, Arc::new(TermOverlapScorer)));
        let model = Arc::new(EchoModel {
            prompts: Mutex::new(Vec::new()),
        });
        let expert = KnowledgeExpert::new(
            "product_expert".into(),
            "products".into(),
            Some("product".into()),
            "be precise".into(),
            Vec::new(),
            5,
            retrieval,
            model.clone(),
        );

        let registry = CapabilityRegistry::new();
        let session = SessionContext::new("s", "u");
        let ctx = HandlerContext {
            registry: &registry,
            session: &session,
        };
        let answer = expert.process("laptop warranty", &ctx).await.unwrap();
        assert!(answer.contains("two years"));
        assert!(!answer.contains("thirty days"));
        assert_eq!(model.prompts.lock().unwrap()[0], "be precise");
        assert!(expert.capabilities().is_empty());
    }

    /// Replies with a tool call first, then echoes the follow-up message.
    struct ToolCallingModel {
        first: Mutex<Option<String>>,
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for ToolCallingModel {
        fn model_name(&self) -> &str {
            "tool-calling"
        }
        async fn complete(&self, _system: &str, user: &str, _s: &SessionContext) -> Result<String> {
            self.messages.lock().unwrap().push(user.to_string());
            Ok(self.first.lock().unwrap().take().unwrap_or_else(|| user.to_string()))
        }
    }

    #[tokio::test]
    async fn expert_runs_the_requested_tool_and_answers_with_its_output() {
        let index = Arc::new(FlatIndex::new(Arc::new(HashEmbedder::new(64))));
        let retrieval = Arc::new(RetrievalEngine::new(index, Arc::new(TermOverlapScorer)));
        let desk = Arc::new(TicketDesk::new());
        let tools = ToolRegistry::with_builtins(retrieval.clone(), desk.clone(), 5)
            .resolve(&["ticket_creator".to_string()])
            .unwrap();
        let model = Arc::new(ToolCallingModel {
            first: Mutex::new(Some(
                "{\"tool\": \"ticket_creator\", \"input\": {\"problem_description\": \"Order 81 arrived broken\"}}"
                    .to_string(),
            )),
            messages: Mutex::new(Vec::new()),
        });
        let expert = KnowledgeExpert::new(
            "customer_service_agent".into(),
            "service".into(),
            Some("service".into()),
            "be kind".into(),
            tools,
            5,
            retrieval,
            model.clone(),
        );
        assert_eq!(expert.capabilities(), vec!["ticket_creator".to_string()]);

        let registry = CapabilityRegistry::new();
        let session = SessionContext::new("s9", "u9");
        let ctx = HandlerContext {
            registry: &registry,
            session: &session,
        };
        let answer = expert.process("My order arrived broken", &ctx).await.unwrap();

        let tickets = desk.tickets();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].session_id, "s9");
        assert_eq!(tickets[0].description, "Order 81 arrived broken");
        assert!(answer.contains(&tickets[0].id));
        assert_eq!(model.messages.lock().unwrap().len(), 2);
    }
}
