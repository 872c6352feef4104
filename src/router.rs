//! Query router.
//!
//! Decides, per query, whether to answer directly or hand the query to
//! exactly one registered handler.
//!
//! ```text
//! query ──▶ candidates ("- name: description", registration order)
//!       ──▶ recalled memory for the user (may be empty)
//!       ──▶ model decision
//!              │
//!              ├─ JSON {"expert", "answer", "remember"} ─▶ structured pick
//!              └─ anything else ─▶ first candidate whose name occurs in the reply
//!                                  (case-insensitive), else a fixed message
//! ```
//!
//! The selected handler receives the original query, and its response is
//! returned unchanged. Failures while collecting candidates, recalling
//! memory or calling the model are logged and returned to the caller. Not
//! finding a handler is a normal outcome ([`RouteOutcome::Undetermined`]).

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use concierge_core::{Error, Result};

use crate::handlers::{Handler, HandlerContext, HandlerKind};
use crate::memory::{InfoType, SessionMemoryStore};
use crate::model::LanguageModel;

/// Returned when no handler could be selected.
pub const UNDETERMINED_MESSAGE: &str =
    "I could not determine the right expert for your question. Please describe it in more detail.";

const ROUTER_PROMPT: &str = "You route customer questions to the single best expert.\n\
Reply with one JSON object and nothing else:\n\
{\"expert\": \"<expert name or null>\", \"answer\": \"<direct answer or null>\", \
\"remember\": [{\"info\": \"<fact>\", \"info_type\": \"preference|profile|general\"}]}\n\
Pick an expert from the list whenever one fits. Answer directly only for greetings \
or questions about the conversation itself. Fill \"remember\" only when the user \
explicitly asks you to remember something.";

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The query went to `handler`, which produced `response`.
    Dispatched { handler: String, response: String },
    /// The model answered without an expert.
    Answered(String),
    /// Only memory writes were requested; the text confirms them.
    Remembered(String),
    Undetermined,
}

impl RouteOutcome {
    pub fn into_response(self) -> String {
        match self {
            RouteOutcome::Dispatched { response, .. } => response,
            RouteOutcome::Answered(text) | RouteOutcome::Remembered(text) => text,
            RouteOutcome::Undetermined => UNDETERMINED_MESSAGE.to_string(),
        }
    }
}

/// Structured reply requested from the model. Every field is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Decision {
    #[serde(default)]
    pub expert: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub remember: Vec<MemoryRequest>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct MemoryRequest {
    pub info: String,
    #[serde(default)]
    pub info_type: Option<String>,
}

/// Parse a [`Decision`] from a model reply: bare JSON, a fenced
/// ```` ```json ```` block, or the outermost `{...}` inside prose.
pub fn parse_decision(reply: &str) -> Option<Decision> {
    parse_json_reply(reply)
}

/// Pull a JSON object of type `T` out of a model reply, accepting the
/// same three shapes as [`parse_decision`].
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Option<T> {
    let trimmed = reply.trim();
    if let Ok(v) = serde_json::from_str::<T>(trimmed) {
        return Some(v);
    }
    if let Some(body) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
    {
        if let Ok(v) = serde_json::from_str::<T>(body.trim()) {
            return Some(v);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<T>(&trimmed[start..=end]).ok()
}

/// First candidate, in the given order, whose name occurs in `reply`
/// ignoring case.
pub fn select_by_substring<'a>(
    reply: &str,
    candidates: &[&'a Arc<dyn Handler>],
) -> Option<&'a Arc<dyn Handler>> {
    let reply = reply.to_lowercase();
    candidates
        .iter()
        .copied()
        .find(|h| reply.contains(&h.name().to_lowercase()))
}

pub fn candidate_block(candidates: &[&Arc<dyn Handler>]) -> String {
    candidates
        .iter()
        .map(|h| format!("- {}: {}", h.name(), h.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Router {
    model: Arc<dyn LanguageModel>,
    memory: Arc<SessionMemoryStore>,
    recall_limit: usize,
}

impl Router {
    pub const NAME: &'static str = "router_agent";

    pub fn new(model: Arc<dyn LanguageModel>, memory: Arc<SessionMemoryStore>, recall_limit: usize) -> Self {
        Self {
            model,
            memory,
            recall_limit,
        }
    }

    fn system_prompt(candidates: &str, memory: &str) -> String {
        let mut prompt = format!("{}\n\nExperts:\n{}\n", ROUTER_PROMPT, candidates);
        if !memory.is_empty() {
            prompt.push_str(&format!("\nWhat you know about this user:\n{}\n", memory));
        }
        prompt
    }

    pub async fn route(&self, query: &str, ctx: &HandlerContext<'_>) -> Result<RouteOutcome> {
        let candidates: Vec<&Arc<dyn Handler>> = ctx.registry.experts().collect();
        if candidates.is_empty() {
            let err = Error::NotFound("no expert handlers registered".to_string());
            error!(error = %err, "routing failed");
            return Err(err);
        }

        let user_id = ctx.session.user_id.as_str();
        let memory = if user_id.is_empty() {
            String::new()
        } else {
            self.memory
                .recall(user_id, self.recall_limit)
                .await
                .map_err(|e| {
                    error!(user_id, error = %e, "memory recall failed");
                    e
                })?
        };

        let prompt = Self::system_prompt(&candidate_block(&candidates), &memory);
        let reply = self
            .model
            .complete(&prompt, query, ctx.session)
            .await
            .map_err(|e| {
                error!(model = self.model.model_name(), error = %e, "routing decision failed");
                e
            })?;
        debug!(reply = %reply, "routing decision");

        let selected = match parse_decision(&reply) {
            Some(decision) => {
                let confirmations = self.apply_memory(&decision.remember, user_id).await?;
                let structured = decision
                    .expert
                    .as_deref()
                    .and_then(|name| ctx.registry.find(name.trim()))
                    .filter(|h| h.kind() != HandlerKind::Router);
                if let Some(handler) = structured {
                    Some(handler)
                } else if let Some(answer) = decision.answer.filter(|a| !a.trim().is_empty()) {
                    info!(route = "answer", "answered without an expert");
                    return Ok(RouteOutcome::Answered(answer));
                } else if !confirmations.is_empty() {
                    return Ok(RouteOutcome::Remembered(confirmations.join("\n")));
                } else {
                    select_by_substring(&reply, &candidates)
                }
            }
            None => select_by_substring(&reply, &candidates),
        };

        let Some(handler) = selected else {
            info!(route = "undetermined", "no handler matched the routing decision");
            return Ok(RouteOutcome::Undetermined);
        };

        info!(route = handler.name(), "dispatching");
        let response = handler.process(query, ctx).await.map_err(|e| {
            error!(handler = handler.name(), error = %e, "handler failed");
            e
        })?;
        Ok(RouteOutcome::Dispatched {
            handler: handler.name().to_string(),
            response,
        })
    }

    async fn apply_memory(&self, requests: &[MemoryRequest], user_id: &str) -> Result<Vec<String>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if user_id.is_empty() {
            warn!(facts = requests.len(), "memory write requested without a user id, ignoring");
            return Ok(Vec::new());
        }
        let mut confirmations = Vec::with_capacity(requests.len());
        for req in requests {
            if req.info.trim().is_empty() {
                continue;
            }
            let info_type = req
                .info_type
                .as_deref()
                .and_then(|t| t.parse().ok())
                .unwrap_or(InfoType::General);
            confirmations.push(self.memory.remember(&req.info, user_id, info_type).await?);
        }
        Ok(confirmations)
    }
}

#[async_trait]
impl Handler for Router {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Router
    }

    fn description(&self) -> &str {
        "Routes each question to the most suitable expert"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["remember".to_string(), "recall".to_string()]
    }

    async fn process(&self, query: &str, ctx: &HandlerContext<'_>) -> Result<String> {
        Ok(self.route(query, ctx).await?.into_response())
    }
}
