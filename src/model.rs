//! Language-model invocation.
//!
//! The router and the expert handlers talk to a model only through the
//! [`LanguageModel`] trait: a system prompt, the user message, and the
//! [`SessionContext`] of the current conversation. Errors are returned
//! as [`Error::Model`] and propagate unmodified; retries happen here,
//! not in the callers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use concierge_core::{Error, Result};

use crate::config::ModelConfig;
use crate::http;

/// One completed exchange in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub query: String,
    pub response: String,
}

/// Per-request conversational state handed to the model and handlers.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    /// Earlier turns of this session, oldest first.
    pub history: Vec<Turn>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            history: Vec::new(),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
        session: &SessionContext,
    ) -> Result<String>;
}

/// Used when `model.provider = "disabled"`. Every call fails.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _: &str, _: &str, _: &SessionContext) -> Result<String> {
        Err(Error::Model(
            "language model is disabled (set [model] provider in the config)".to_string(),
        ))
    }
}

/// Chat completion client for `POST {base_url}/chat/completions`.
pub struct OpenAIChat {
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &ModelConfig, model: String) -> anyhow::Result<Self> {
        Ok(Self {
            model,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: http::api_key(&config.api_key_env)?,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, system_prompt: &str, user_message: &str, session: &SessionContext) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({"role": "system", "content": system_prompt})];
        for turn in &session.history {
            messages.push(serde_json::json!({"role": "user", "content": turn.query}));
            messages.push(serde_json::json!({"role": "assistant", "content": turn.response}));
        }
        messages.push(serde_json::json!({"role": "user", "content": user_message}));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
        session: &SessionContext,
    ) -> Result<String> {
        let body = self.request_body(system_prompt, user_message, session);
        let json = http::post_json(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await
        .map_err(|e| Error::Model(e.to_string()))?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Model("response has no choices[0].message.content".to_string()))
    }
}

/// Model used by expert and formatter handlers.
pub fn create_model(config: &ModelConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    build(config, config.model.clone())
}

/// Model used for the routing decision: `router_model` when set.
pub fn create_router_model(config: &ModelConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    build(config, config.router_model.clone().or_else(|| config.model.clone()))
}

fn build(config: &ModelConfig, model: Option<String>) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => {
            let model = model.ok_or_else(|| anyhow::anyhow!("model.model required for OpenAI provider"))?;
            Ok(Arc::new(OpenAIChat::new(config, model)?))
        }
        other => anyhow::bail!("Unknown model provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat() -> OpenAIChat {
        OpenAIChat {
            model: "m".to_string(),
            url: "http://localhost/chat/completions".to_string(),
            api_key: "k".to_string(),
            temperature: Some(0.2),
            max_retries: 0,
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn request_body_includes_history_in_order() {
        let mut session = SessionContext::new("s", "u");
        session.history.push(Turn {
            query: "hi".into(),
            response: "hello".into(),
        });
        let body = chat().request_body("sys", "next", &session);
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(body["messages"][3]["content"], "next");
        assert!(body.get("temperature").is_some());
    }

    #[tokio::test]
    async fn disabled_model_errors() {
        let err = DisabledModel
            .complete("s", "u", &SessionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }
}
