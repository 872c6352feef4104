//! Implementations of the `concierge` subcommands.
//!
//! Each `run_*` function takes the loaded [`Config`], builds only the
//! collaborators it needs, prints results to stdout and returns
//! `anyhow::Result` so the binary can report failures uniformly.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use concierge_core::models::{keys, SearchQuery};
use concierge_core::rerank::RerankOutcome;
use concierge_core::store::VectorIndex;

use crate::config::{Config, IndexBackend};
use crate::conversation::SqliteConversationLog;
use crate::embedding::create_embedder;
use crate::extract::FileExtractor;
use crate::flat_store::FlatStore;
use crate::ingest::{IngestStatus, IngestionPipeline};
use crate::memory::{InfoType, SessionMemoryStore};
use crate::progress::ProgressMode;
use crate::retrieval::RetrievalEngine;
use crate::scorer::create_scorer;
use crate::service::{open_index, Concierge};
use crate::sqlite_index::SqliteIndex;

async fn index_for(cfg: &Config) -> Result<Arc<dyn VectorIndex>> {
    let embedder = create_embedder(&cfg.embedding)?;
    open_index(cfg, embedder).await
}

/// Create the index (and the conversation log, when configured).
pub async fn run_init(cfg: &Config) -> Result<()> {
    let embedder = create_embedder(&cfg.embedding)?;
    let path = &cfg.index.path;
    match cfg.index.backend {
        IndexBackend::Sqlite => {
            let index = SqliteIndex::open(path, embedder).await?;
            index.close().await;
        }
        IndexBackend::Flat => {
            let store = FlatStore::open(path, embedder, cfg.retrieval.overfetch_factor).await?;
            store.save().await?;
        }
    }
    if let Some(log_path) = &cfg.conversation.log_path {
        SqliteConversationLog::open(log_path).await?.close().await;
    }
    println!(
        "Index initialized at {} ({} backend).",
        path.display(),
        backend_name(cfg.index.backend)
    );
    Ok(())
}

pub async fn run_ingest(
    cfg: &Config,
    path: &Path,
    category: Option<&str>,
    progress: ProgressMode,
) -> Result<()> {
    let index = index_for(cfg).await?;
    let pipeline = IngestionPipeline::new(
        index,
        Arc::new(FileExtractor::new(cfg.extraction.ocr_command.clone())),
        cfg.ingest.workers,
        cfg.chunking.chunk_size,
        cfg.chunking.chunk_overlap,
    )
    .with_progress(Arc::from(progress.reporter()));

    let report = pipeline.ingest(path, category).await?;
    match report.status {
        IngestStatus::NothingToProcess => println!("Nothing to process in {}.", path.display()),
        IngestStatus::Completed => println!(
            "Ingested {} file(s) from {}: {} chunks written.",
            report.processed,
            path.display(),
            report.chunks
        ),
    }
    if report.skipped > 0 {
        println!("Skipped {} file(s) with no extractable text.", report.skipped);
    }
    if !report.failures.is_empty() {
        println!("Failed {} file(s):", report.failures.len());
        for f in &report.failures {
            println!("  {}: {}", f.path, f.error);
        }
    }
    Ok(())
}

pub async fn run_search(
    cfg: &Config,
    query: &str,
    category: Option<String>,
    top_k: Option<usize>,
) -> Result<()> {
    let index = index_for(cfg).await?;
    let engine = RetrievalEngine::new(index, create_scorer(&cfg.reranker)?)
        .with_overfetch(cfg.retrieval.overfetch_factor);
    let mut search = SearchQuery::new(query, top_k.unwrap_or(cfg.retrieval.top_k));
    search.category = category;

    let results = engine.search(&search).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    if let RerankOutcome::Degraded { reason } = &results.outcome {
        println!("(reranking unavailable: {}; showing retrieval order)", reason);
    }
    for (i, item) in results.items.iter().enumerate() {
        let doc = &item.document;
        let score = item
            .score
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}. [{}] {} ({})",
            i + 1,
            score,
            doc.get_str(keys::SOURCE).unwrap_or("-"),
            doc.get_str(keys::CATEGORY).unwrap_or("-")
        );
        println!("    {}", snippet(&doc.content, 200));
    }
    Ok(())
}

pub async fn run_remember(cfg: &Config, info: &str, user: &str, info_type: &str) -> Result<()> {
    let info_type: InfoType = info_type.parse()?;
    let memory = SessionMemoryStore::new(index_for(cfg).await?);
    println!("{}", memory.remember(info, user, info_type).await?);
    Ok(())
}

pub async fn run_recall(cfg: &Config, user: &str) -> Result<()> {
    let memory = SessionMemoryStore::new(index_for(cfg).await?);
    let text = memory.recall(user, cfg.memory.recall_limit).await?;
    if text.is_empty() {
        println!("Nothing remembered for {}.", user);
    } else {
        println!("{}", text);
    }
    Ok(())
}

pub async fn run_ask(cfg: &Config, query: &str, user: Option<&str>, session: Option<&str>) -> Result<()> {
    let concierge = Concierge::build(cfg).await?;
    println!("{}", concierge.respond(query, user, session).await);
    Ok(())
}

pub async fn run_handlers(cfg: &Config) -> Result<()> {
    let concierge = Concierge::build(cfg).await?;
    for info in concierge.registry().infos() {
        println!("{:<28} {:<10} {}", info.name, info.kind.to_string(), info.description);
        if !info.capabilities.is_empty() {
            println!("{:<28} {:<10} tools: {}", "", "", info.capabilities.join(", "));
        }
    }
    Ok(())
}

pub async fn run_history(cfg: &Config, session: &str, limit: usize) -> Result<()> {
    let Some(log_path) = &cfg.conversation.log_path else {
        bail!("conversation.log_path is not configured");
    };
    let log = SqliteConversationLog::open(log_path).await?;
    let records = log.history(session, limit).await?;
    if records.is_empty() {
        println!("No conversation recorded for session {}.", session);
    }
    for r in records {
        println!("[{}] {}", r.timestamp.format("%Y-%m-%d %H:%M:%S"), r.user_id);
        println!("  Q: {}", r.query);
        println!("  A: {}", snippet(&r.response, 400));
    }
    log.close().await;
    Ok(())
}

pub async fn run_stats(cfg: &Config) -> Result<()> {
    let index = index_for(cfg).await?;
    println!("backend:        {}", index.backend());
    println!("path:           {}", cfg.index.path.display());
    println!("documents:      {}", index.count().await?);
    println!("embedding:      {}", cfg.embedding.provider);
    println!("reranker:       {}", cfg.reranker.provider);
    if let Some(log_path) = &cfg.conversation.log_path {
        let log = SqliteConversationLog::open(log_path).await?;
        println!("conversations:  {}", log.count().await?);
        log.close().await;
    }
    Ok(())
}

fn backend_name(backend: IndexBackend) -> &'static str {
    match backend {
        IndexBackend::Sqlite => "sqlite",
        IndexBackend::Flat => "flat",
    }
}

/// First `max` characters of `text` on one line.
fn snippet(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_flattens_and_truncates() {
        assert_eq!(snippet("a\n  b\tc", 10), "a b c");
        assert_eq!(snippet("abcdef", 3), "abc...");
    }
}
