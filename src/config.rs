use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use concierge_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default = "default_experts")]
    pub experts: Vec<ExpertConfig>,
    #[serde(default)]
    pub formatter: FormatterConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Sqlite,
    Flat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: IndexBackend,
    /// SQLite file for `sqlite`, directory for `flat`.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_index_path(),
        }
    }
}

fn default_backend() -> IndexBackend {
    IndexBackend::Flat
}
fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            overfetch_factor: default_overfetch(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_overfetch() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: default_openai_base_url(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Separate model for the routing decision. Falls back to `model`.
    #[serde(default)]
    pub router_model: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            model: None,
            router_model: None,
            base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
            temperature: None,
            max_retries: default_max_retries(),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_model_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_model_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_reranker_provider(),
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_reranker_provider() -> String {
    "lexical".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_limit: default_recall_limit(),
        }
    }
}

fn default_recall_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Sessions held in memory at once; the least valuable are evicted.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,
    /// A session with no query for this long is forgotten.
    #[serde(default = "default_session_idle_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_session_idle_secs(),
        }
    }
}

fn default_max_turns() -> usize {
    20
}

fn default_max_sessions() -> u64 {
    10_000
}

fn default_session_idle_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConversationConfig {
    /// SQLite file receiving one row per completed query.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExtractionConfig {
    /// External OCR program, called as `<cmd> <image-path>`; text on stdout.
    #[serde(default)]
    pub ocr_command: Option<String>,
}

/// An expert handler defined in config.
#[derive(Debug, Deserialize, Clone)]
pub struct ExpertConfig {
    pub name: String,
    pub description: String,
    /// Restrict retrieval to documents of this category.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_expert_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

fn default_expert_prompt() -> String {
    "You are a domain expert. Answer the question using only the provided context. \
     If the context does not contain the answer, say so."
        .to_string()
}

fn expert(name: &str, description: &str, category: Option<&str>) -> ExpertConfig {
    ExpertConfig {
        name: name.to_string(),
        description: description.to_string(),
        category: category.map(str::to_string),
        system_prompt: default_expert_prompt(),
        tools: vec![crate::tools::KnowledgeSearchTool::NAME.to_string()],
        top_k: None,
    }
}

fn default_experts() -> Vec<ExpertConfig> {
    vec![
        expert(
            "knowledge_base_agent",
            "Answers questions from the knowledge base across all ingested documents",
            None,
        ),
        expert(
            "product_expert",
            "Product features, specifications, pricing and usage questions",
            Some("product"),
        ),
        ExpertConfig {
            tools: vec![
                crate::tools::KnowledgeSearchTool::NAME.to_string(),
                crate::tools::TicketCreator::NAME.to_string(),
            ],
            ..expert(
                "customer_service_agent",
                "Accounts, orders, returns, refunds, warranty policy and complaints",
                Some("service"),
            )
        },
        expert(
            "tech_support_agent",
            "Troubleshooting and technical documentation questions",
            Some("technical"),
        ),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct FormatterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

impl EmbeddingConfig {
    /// Dimensions the configured embedder produces.
    pub fn effective_dims(&self) -> usize {
        self.dims
            .unwrap_or(concierge_core::embedding::HashEmbedder::DEFAULT_DIMS)
    }
}

impl Config {
    /// Offline defaults: flat index under `./data/index`, hashing
    /// embedder, lexical reranker, model disabled.
    pub fn minimal() -> Self {
        Self {
            index: IndexConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig::default(),
            embedding: EmbeddingConfig::default(),
            model: ModelConfig::default(),
            reranker: RerankerConfig::default(),
            memory: MemoryConfig::default(),
            session: SessionConfig::default(),
            conversation: ConversationConfig::default(),
            extraction: ExtractionConfig::default(),
            experts: default_experts(),
            formatter: FormatterConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.overfetch_factor < 2 {
        anyhow::bail!("retrieval.overfetch_factor must be >= 2");
    }

    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    match config.model.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.model.model.is_none() {
                anyhow::bail!("model.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.reranker.provider.as_str() {
        "lexical" => {}
        "http" => {
            if config.reranker.url.is_none() {
                anyhow::bail!("reranker.url must be specified when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown reranker provider: '{}'. Must be lexical or http.",
            other
        ),
    }

    // Validate experts
    let mut seen = std::collections::HashSet::new();
    for e in &config.experts {
        if e.name.trim().is_empty() {
            anyhow::bail!("experts: name must not be empty");
        }
        if !seen.insert(e.name.as_str()) {
            anyhow::bail!("experts: duplicate name '{}'", e.name);
        }
        if e.top_k == Some(0) {
            anyhow::bail!("experts.{}: top_k must be >= 1", e.name);
        }
        for tool in &e.tools {
            if !crate::tools::BUILTIN_TOOLS.contains(&tool.as_str()) {
                anyhow::bail!(
                    "experts.{}: unknown tool '{}'. Must be one of: {}",
                    e.name,
                    tool,
                    crate::tools::BUILTIN_TOOLS.join(", ")
                );
            }
        }
    }

    if config.session.max_sessions == 0 {
        anyhow::bail!("session.max_sessions must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.index.backend, IndexBackend::Flat);
        assert_eq!(cfg.chunking.chunk_size, 300);
        assert_eq!(cfg.chunking.chunk_overlap, 50);
        assert_eq!(cfg.retrieval.overfetch_factor, 2);
        assert_eq!(cfg.ingest.workers, 10);
        assert_eq!(cfg.memory.recall_limit, 10);
        assert_eq!(cfg.experts.len(), 4);
        assert!(cfg.formatter.enabled);
        assert!(!cfg.model.is_enabled());
    }

    #[test]
    fn parses_backend_and_experts() {
        let cfg = parse(
            r#"
[index]
backend = "sqlite"
path = "/tmp/x.sqlite"

[[experts]]
name = "billing"
description = "Invoices"
category = "billing"
top_k = 4
"#,
        )
        .unwrap();
        assert_eq!(cfg.index.backend, IndexBackend::Sqlite);
        assert_eq!(cfg.experts.len(), 1);
        assert_eq!(cfg.experts[0].category.as_deref(), Some("billing"));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let err = parse("[chunking]\nchunk_size = 10\nchunk_overlap = 10\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn rejects_low_overfetch() {
        assert!(parse("[retrieval]\noverfetch_factor = 1\n").is_err());
    }

    #[test]
    fn rejects_duplicate_experts() {
        let src = r#"
[[experts]]
name = "a"
description = "x"

[[experts]]
name = "a"
description = "y"
"#;
        assert!(parse(src).unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn openai_model_requires_name() {
        assert!(parse("[model]\nprovider = \"openai\"\n").is_err());
        assert!(parse("[model]\nprovider = \"openai\"\nmodel = \"gpt-4o-mini\"\n").is_ok());
    }

    #[test]
    fn expert_tools_must_exist() {
        let src = r#"
[[experts]]
name = "support"
description = "x"
tools = ["ticket_creator", "send_email"]
"#;
        assert!(parse(src).unwrap_err().to_string().contains("send_email"));

        let cfg = parse("").unwrap();
        let service = cfg
            .experts
            .iter()
            .find(|e| e.name == "customer_service_agent")
            .unwrap();
        assert!(service.tools.contains(&"ticket_creator".to_string()));
    }

    #[test]
    fn session_store_must_hold_a_session() {
        assert!(parse("[session]
max_sessions = 0
").is_err());
        assert_eq!(parse("").unwrap().session.max_sessions, 10_000);
    }

    #[test]
    fn http_reranker_requires_url() {
        assert!(parse("[reranker]\nprovider = \"http\"\n").is_err());
    }
}
