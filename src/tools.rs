//! Tools experts can call while answering.
//!
//! An expert with tools lists them in its system prompt. If the model's
//! reply is a tool call,
//!
//! ```json
//! {"tool": "ticket_creator", "input": {"problem_description": "..."}}
//! ```
//!
//! the expert runs the tool and asks the model once more with the tool
//! output appended. At most one tool call is made per query.
//!
//! Built-in tools:
//!
//! | Name | Does |
//! |------|------|
//! | `knowledge_search` | Searches the knowledge base within the expert's category |
//! | `ticket_creator` | Opens a service ticket for follow-up by staff |

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use concierge_core::models::{keys, SearchQuery};
use concierge_core::{Error, Result};

use crate::model::SessionContext;
use crate::retrieval::RetrievalEngine;
use crate::router::parse_json_reply;

/// Names accepted in an expert's `tools` list.
pub const BUILTIN_TOOLS: &[&str] = &[KnowledgeSearchTool::NAME, TicketCreator::NAME];

/// What a tool sees of the query it is serving.
pub struct ToolContext<'a> {
    pub session: &'a SessionContext,
    /// Category of the calling expert, if it has one.
    pub category: Option<&'a str>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier the model uses to call the tool.
    fn name(&self) -> &str;

    /// One line shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the `input` object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, input: Value, ctx: &ToolContext<'_>) -> Result<Value>;
}

/// A tool call found in a model reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub input: Value,
}

pub fn parse_tool_call(reply: &str) -> Option<ToolCall> {
    parse_json_reply(reply)
}

/// Prompt section describing `tools` and the call format.
pub fn tool_block(tools: &[Arc<dyn Tool>]) -> String {
    let mut block = String::from("You can use these tools:\n");
    for t in tools {
        block.push_str(&format!(
            "- {}: {} Input schema: {}\n",
            t.name(),
            t.description(),
            t.parameters_schema()
        ));
    }
    block.push_str(
        "To use a tool, reply with only a JSON object {\"tool\": \"<name>\", \"input\": {...}}. \
         Otherwise answer directly.",
    );
    block
}

fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidArgument(format!("missing required parameter: {}", field)))
}

/// Tools by name, in registration order.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry holding every built-in tool.
    pub fn with_builtins(retrieval: Arc<RetrievalEngine>, desk: Arc<TicketDesk>, top_k: usize) -> Self {
        let search: Arc<dyn Tool> = Arc::new(KnowledgeSearchTool::new(retrieval, top_k));
        let tickets: Arc<dyn Tool> = Arc::new(TicketCreator::new(desk));
        Self {
            tools: vec![search, tickets],
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Resolve `names` for an expert; an unknown name is an error.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Tool>>> {
        names
            .iter()
            .map(|n| {
                self.get(n)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("tool '{}'", n)))
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// knowledge_search
// ═══════════════════════════════════════════════════════════════════════

pub struct KnowledgeSearchTool {
    retrieval: Arc<RetrievalEngine>,
    top_k: usize,
}

impl KnowledgeSearchTool {
    pub const NAME: &'static str = "knowledge_search";

    pub fn new(retrieval: Arc<RetrievalEngine>, top_k: usize) -> Self {
        Self { retrieval, top_k }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Search the knowledge base for passages relevant to a query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext<'_>) -> Result<Value> {
        let query = required_str(&input, "query")?;
        let limit = input
            .get("limit")
            .and_then(Value::as_u64)
            .map_or(self.top_k, |n| n as usize);
        let mut search = SearchQuery::new(query, limit);
        search.category = ctx.category.map(str::to_string);
        let set = self.retrieval.search(&search).await?;
        let results: Vec<Value> = set
            .documents()
            .map(|d| {
                json!({
                    "source": d.get_str(keys::SOURCE),
                    "content": d.content,
                })
            })
            .collect();
        Ok(json!({ "results": results }))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ticket_creator
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticket {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Tickets opened during this process's lifetime.
#[derive(Default)]
pub struct TicketDesk {
    tickets: Mutex<Vec<Ticket>>,
}

impl TicketDesk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, user_id: &str, session_id: &str, description: &str) -> Result<Ticket> {
        let id = format!("TICKET-{}", &Uuid::new_v4().simple().to_string()[..8]).to_uppercase();
        let ticket = Ticket {
            id,
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.tickets
            .lock()
            .map_err(|_| Error::BackendUnavailable("ticket desk lock poisoned".to_string()))?
            .push(ticket.clone());
        info!(ticket = %ticket.id, user_id, session_id, "service ticket opened");
        Ok(ticket)
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        self.tickets.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

pub struct TicketCreator {
    desk: Arc<TicketDesk>,
}

impl TicketCreator {
    pub const NAME: &'static str = "ticket_creator";

    pub fn new(desk: Arc<TicketDesk>) -> Self {
        Self { desk }
    }
}

#[async_trait]
impl Tool for TicketCreator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Open a service ticket for complaints or problems that need follow-up by staff."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "problem_description": { "type": "string" }
            },
            "required": ["problem_description"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext<'_>) -> Result<Value> {
        let description = required_str(&input, "problem_description")?;
        let ticket = self
            .desk
            .open(&ctx.session.user_id, &ctx.session.session_id, description)?;
        Ok(json!({
            "ticket_id": ticket.id,
            "message": format!(
                "Ticket {} has been opened. Our team will follow up as soon as possible.",
                ticket.id
            ),
        }))
    }
}
