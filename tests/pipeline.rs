use std::fs;
use std::path::Path;
use std::sync::Arc;

use concierge::extract::{ExtractError, Extractor, FileExtractor, FileType};
use concierge::ingest::{combine_extracted, ExtractedFile, IngestStatus, IngestionPipeline};
use concierge::memory::{InfoType, SessionMemoryStore};
use concierge_core::chunk::chunk_documents;
use concierge_core::embedding::HashEmbedder;
use concierge_core::models::{Filter, Metadata};
use concierge_core::store::flat::FlatIndex;
use concierge_core::store::VectorIndex;
use tempfile::TempDir;

/// Reads files as text, failing any file whose name starts with `bad`.
struct FlakyExtractor;

impl Extractor for FlakyExtractor {
    fn extract(&self, path: &Path, _ft: FileType) -> Result<Option<String>, ExtractError> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.starts_with("bad") {
            return Err(ExtractError::Pdf(format!("cannot parse {}", name)));
        }
        Ok(Some(fs::read_to_string(path)?))
    }
}

fn flat_index() -> Arc<FlatIndex> {
    Arc::new(FlatIndex::new(Arc::new(HashEmbedder::new(64))))
}

fn write_corpus(dir: &Path) {
    fs::write(dir.join("a.txt"), "Alpha covers the warranty terms for laptops. ".repeat(12)).unwrap();
    fs::write(dir.join("b.txt"), "Beta explains how to reset a router.").unwrap();
    fs::write(dir.join("c.md"), "# Gamma\n\nReturns are accepted within thirty days.").unwrap();
    fs::write(dir.join("bad1.txt"), "never read").unwrap();
    fs::write(dir.join("bad2.pdf"), "never read").unwrap();
}

#[tokio::test]
async fn partial_failures_are_reported_and_the_rest_written_once() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let index = flat_index();
    let pipeline = IngestionPipeline::new(index.clone(), Arc::new(FlakyExtractor), 10, 300, 50);

    let report = pipeline.ingest(tmp.path(), Some("product")).await.unwrap();
    assert_eq!(report.status, IngestStatus::Completed);
    assert_eq!(report.processed, 3);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures[0].path.ends_with("bad1.txt"));
    assert!(report.failures[1].path.ends_with("bad2.pdf"));
    assert!(report.failures[0].error.contains("cannot parse"));

    // The index holds exactly the chunks of the sorted concatenation.
    let extracted: Vec<ExtractedFile> = ["a.txt", "b.txt", "c.md"]
        .iter()
        .map(|name| ExtractedFile {
            path: tmp.path().join(name),
            text: fs::read_to_string(tmp.path().join(name)).unwrap(),
        })
        .collect();
    let expected = chunk_documents(&combine_extracted(&extracted), &Metadata::new(), 300, 50).unwrap();
    assert_eq!(report.chunks, expected.len());

    let stored = index.fetch(&Filter::category("product"), 1000).await.unwrap();
    let stored_text: Vec<&str> = stored.iter().map(|d| d.content.as_str()).collect();
    let expected_text: Vec<&str> = expected.iter().map(|d| d.content.as_str()).collect();
    assert_eq!(stored_text, expected_text);
    let source = tmp.path().display().to_string();
    assert!(stored.iter().all(|d| d.get_str("source") == Some(source.as_str())));
}

#[tokio::test]
async fn directory_with_no_text_is_nothing_to_process() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("bad.txt"), "x").unwrap();
    fs::write(tmp.path().join("archive.tar"), "x").unwrap();
    let index = flat_index();
    let pipeline = IngestionPipeline::new(index.clone(), Arc::new(FlakyExtractor), 10, 300, 50);

    let report = pipeline.ingest(tmp.path(), None).await.unwrap();
    assert_eq!(report.status, IngestStatus::NothingToProcess);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn reingesting_doubles_the_chunks() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("faq.md"), "How do I reset my password? Use the account page.").unwrap();
    let index = flat_index();
    let pipeline = IngestionPipeline::new(index.clone(), Arc::new(FileExtractor::default()), 10, 300, 50);

    let first = pipeline.ingest(tmp.path(), Some("service")).await.unwrap();
    let after_first = index.count().await.unwrap();
    pipeline.ingest(tmp.path(), Some("service")).await.unwrap();
    assert_eq!(after_first, first.chunks);
    assert_eq!(index.count().await.unwrap(), 2 * after_first);
}

#[tokio::test]
async fn memory_is_scoped_per_user_and_shares_the_index() {
    let index = flat_index();
    let memory = SessionMemoryStore::new(index.clone());
    memory
        .remember("prefers email contact", "u1", InfoType::Preference)
        .await
        .unwrap();

    assert!(memory
        .recall("u1", 10)
        .await
        .unwrap()
        .contains("preference: prefers email contact"));
    assert_eq!(memory.recall("u2", 10).await.unwrap(), "");
    assert_eq!(index.count().await.unwrap(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_subdirectory_is_reported_not_fatal() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.txt"), "Alpha covers the warranty terms.").unwrap();
    let locked = tmp.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("hidden.txt"), "never read").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users read through the mode bits; nothing to observe then.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let index = flat_index();
    let pipeline = IngestionPipeline::new(index.clone(), Arc::new(FileExtractor::default()), 4, 300, 50);
    let report = pipeline.ingest(tmp.path(), None).await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    let report = report.unwrap();
    assert_eq!(report.status, IngestStatus::Completed);
    assert_eq!(report.processed, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("locked"));
    assert!(index.count().await.unwrap() > 0);
}
