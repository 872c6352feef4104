//! Ingestion pipeline: files → extracted text → chunks → vector index.
//!
//! # Single file
//!
//! The extension picks a [`FileType`]; unsupported extensions are skipped,
//! not failed. The text is split with the configured chunk size and
//! overlap, and each chunk gets `source`, `category`, `chunk_index` and
//! `start_index` metadata before a single write to the index.
//!
//! # Directory
//!
//! ```text
//! walk (recursive, regular files) ──▶ worker pool (fixed width) ──▶ join
//!                                      extract on blocking threads     │
//!                                                                      ▼
//!                          sort successes by path, concatenate ──▶ chunk once ──▶ write once
//! ```
//!
//! - At most `workers` extractions run at once, gated by a semaphore.
//! - A file that fails extraction, or an entry the walk cannot read, is
//!   recorded in [`IngestReport::failures`] and the batch carries on.
//! - Workers only produce text; nothing touches the index until every
//!   worker has finished.
//! - If no file produced text the report says
//!   [`IngestStatus::NothingToProcess`] and nothing is written.
//!
//! Dropping the future returned by [`IngestionPipeline::ingest`] abandons
//! the batch: queued work is aborted, running extractions finish in the
//! background, and nothing is written.
//!
//! Re-ingesting the same source stores a second, independent set of
//! chunks. There is no deduplication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use concierge_core::chunk::chunk_documents;
use concierge_core::models::{keys, Metadata};
use concierge_core::store::VectorIndex;
use concierge_core::{Error, Result};

use crate::extract::{Extractor, FileType};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};

/// Result of one ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// Files that produced text.
    pub processed: usize,
    /// Chunks written to the index.
    pub chunks: usize,
    /// Files whose extension is not supported, or whose content yielded no text.
    pub skipped: usize,
    /// `(path, error)` for every file whose extraction failed.
    pub failures: Vec<IngestFailure>,
    pub status: IngestStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// At least one file produced text and its chunks were written.
    Completed,
    /// No file produced text. Nothing was written.
    NothingToProcess,
}

impl IngestReport {
    fn nothing(skipped: usize, failures: Vec<IngestFailure>) -> Self {
        Self {
            processed: 0,
            chunks: 0,
            skipped,
            failures,
            status: IngestStatus::NothingToProcess,
        }
    }
}

/// Text extracted from one file of a directory batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFile {
    pub path: PathBuf,
    pub text: String,
}

/// Join extracted files into the single text a directory batch is chunked
/// from. Each file is introduced by a `--- Content from <path> ---` line.
pub fn combine_extracted(files: &[ExtractedFile]) -> String {
    files
        .iter()
        .map(|f| format!("\n--- Content from {} ---\n{}\n", f.path.display(), f.text))
        .collect()
}

pub struct IngestionPipeline {
    index: Arc<dyn VectorIndex>,
    extractor: Arc<dyn Extractor>,
    workers: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    progress: Arc<dyn IngestProgressReporter>,
}

impl IngestionPipeline {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        extractor: Arc<dyn Extractor>,
        workers: usize,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            index,
            extractor,
            workers: workers.max(1),
            chunk_size,
            chunk_overlap,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Ingest a file or a directory.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when `path` does not exist; index write errors
    /// are surfaced. Per-file extraction failures are never errors.
    pub async fn ingest(&self, path: &Path, category: Option<&str>) -> Result<IngestReport> {
        if path.is_dir() {
            self.ingest_directory(path, category).await
        } else if path.is_file() {
            self.ingest_file(path, category).await
        } else {
            Err(Error::NotFound(format!("path {}", path.display())))
        }
    }

    async fn ingest_file(&self, path: &Path, category: Option<&str>) -> Result<IngestReport> {
        let Some(file_type) = FileType::from_path(path) else {
            info!(path = %path.display(), "unsupported file type, skipping");
            return Ok(IngestReport::nothing(1, Vec::new()));
        };

        let extractor = self.extractor.clone();
        let owned = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&owned, file_type))
            .await
            .map_err(|e| Error::Extraction {
                path: path.display().to_string(),
                message: e.to_string(),
            });

        let text = match extracted {
            Ok(Ok(Some(text))) if !text.trim().is_empty() => text,
            Ok(Ok(_)) => {
                info!(path = %path.display(), "no text extracted");
                return Ok(IngestReport::nothing(1, Vec::new()));
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "extraction failed");
                return Ok(IngestReport::nothing(0, vec![failure(path, e)]));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "extraction task failed");
                return Ok(IngestReport::nothing(0, vec![failure(path, e)]));
            }
        };

        let chunks = self.write(&text, path, category).await?;
        Ok(IngestReport {
            processed: 1,
            chunks,
            skipped: 0,
            failures: Vec::new(),
            status: IngestStatus::Completed,
        })
    }

    async fn ingest_directory(&self, dir: &Path, category: Option<&str>) -> Result<IngestReport> {
        let source = dir.display().to_string();
        self.progress.report(IngestProgressEvent::Discovering {
            source: source.clone(),
        });

        let mut skipped = 0usize;
        let mut failures = Vec::new();
        let mut jobs: Vec<(PathBuf, FileType)> = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(dir);
                    warn!(path = %path.display(), error = %e, "cannot read directory entry");
                    failures.push(failure(path, &e));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match FileType::from_path(entry.path()) {
                Some(ft) => jobs.push((entry.path().to_path_buf(), ft)),
                None => skipped += 1,
            }
        }

        if jobs.is_empty() {
            info!(dir = %source, failed = failures.len(), "nothing to process");
            return Ok(IngestReport::nothing(skipped, failures));
        }

        let total = jobs.len() as u64;
        info!(dir = %source, files = total, workers = self.workers, "extracting directory");

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();
        for (path, file_type) in jobs {
            let semaphore = semaphore.clone();
            let extractor = self.extractor.clone();
            set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let p = path.clone();
                        tokio::task::spawn_blocking(move || extractor.extract(&p, file_type))
                            .await
                            .map_err(|e| e.to_string())
                            .and_then(|r| r.map_err(|e| e.to_string()))
                    }
                    Err(e) => Err(e.to_string()),
                };
                (path, outcome)
            });
        }

        let mut extracted = Vec::new();
        let mut done = 0u64;
        while let Some(joined) = set.join_next().await {
            done += 1;
            self.progress.report(IngestProgressEvent::Extracting {
                source: source.clone(),
                n: done,
                total,
            });
            match joined {
                Ok((path, Ok(Some(text)))) if !text.trim().is_empty() => {
                    debug!(path = %path.display(), chars = text.len(), "extracted");
                    extracted.push(ExtractedFile { path, text });
                }
                Ok((_, Ok(_))) => skipped += 1,
                Ok((path, Err(e))) => {
                    warn!(path = %path.display(), error = %e, "extraction failed");
                    failures.push(IngestFailure {
                        path: path.display().to_string(),
                        error: e,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "extraction worker failed");
                    failures.push(IngestFailure {
                        path: source.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        failures.sort_by(|a, b| a.path.cmp(&b.path));

        if extracted.is_empty() {
            info!(dir = %source, failed = failures.len(), "nothing to process");
            return Ok(IngestReport::nothing(skipped, failures));
        }

        extracted.sort_by(|a, b| a.path.cmp(&b.path));
        let processed = extracted.len();
        let combined = combine_extracted(&extracted);
        let chunks = self.write(&combined, dir, category).await?;

        info!(
            dir = %source,
            processed,
            failed = failures.len(),
            chunks,
            "directory ingested"
        );
        Ok(IngestReport {
            processed,
            chunks,
            skipped,
            failures,
            status: IngestStatus::Completed,
        })
    }

    /// Chunk `text` and write it to the index in one call.
    async fn write(&self, text: &str, source: &Path, category: Option<&str>) -> Result<usize> {
        let mut base = Metadata::new();
        base.insert(keys::SOURCE.to_string(), source.display().to_string().into());
        if let Some(c) = category {
            base.insert(keys::CATEGORY.to_string(), c.into());
        }
        let docs = chunk_documents(text, &base, self.chunk_size, self.chunk_overlap)?;
        let written = self.index.add_documents(&docs).await?;
        self.progress.report(IngestProgressEvent::Written {
            source: source.display().to_string(),
            chunks: written as u64,
        });
        Ok(written)
    }
}

fn failure(path: &Path, err: impl std::fmt::Display) -> IngestFailure {
    IngestFailure {
        path: path.display().to_string(),
        error: err.to_string(),
    }
}
