//! File-backed flat [`VectorIndex`] (array backend).
//!
//! Wraps the in-memory [`FlatIndex`] and persists it as two files in one
//! directory:
//!
//! - `index.bin`: magic `CNFX`, format version, dimensions and entry count
//!   (little-endian), followed by `count * dims` little-endian `f32`s;
//! - `docstore.jsonl`: one JSON [`Document`] per line, same order as the
//!   vectors.
//!
//! [`save`](FlatStore::save) writes both files to temporary names and
//! renames them into place; saves are serialized by a mutex so a save
//! never interleaves with another save or with an add. Every mutating
//! call saves once it finishes; if that save fails the in-memory change is
//! rolled back, so memory never runs ahead of disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use concierge_core::embedding::{blob_to_vec, vec_to_blob, Embedder};
use concierge_core::models::{Document, Filter, ScoredDocument};
use concierge_core::store::flat::{FlatEntry, FlatIndex};
use concierge_core::store::VectorIndex;
use concierge_core::{Error, Result};

const INDEX_FILE: &str = "index.bin";
const DOCSTORE_FILE: &str = "docstore.jsonl";
const MAGIC: &[u8; 4] = b"CNFX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

pub struct FlatStore {
    dir: PathBuf,
    inner: FlatIndex,
    write_lock: Mutex<()>,
}

impl FlatStore {
    /// Load the index stored in `dir`, or start empty if none exists.
    pub async fn open(dir: &Path, embedder: Arc<dyn Embedder>, overfetch: usize) -> Result<Self> {
        let entries = if dir.join(INDEX_FILE).exists() {
            load(dir, embedder.dims()).await?
        } else {
            Vec::new()
        };
        info!(
            dir = %dir.display(),
            documents = entries.len(),
            "opened flat index"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            inner: FlatIndex::from_entries(embedder, entries).with_overfetch(overfetch),
            write_lock: Mutex::new(()),
        })
    }

    /// Write the current contents to disk.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save_locked().await
    }

    async fn save_locked(&self) -> Result<()> {
        let entries = self.inner.snapshot()?;
        let dims = self.inner.embedder().dims();
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(Error::backend)?;

        let mut index = Vec::with_capacity(HEADER_LEN + entries.len() * dims * 4);
        index.extend_from_slice(MAGIC);
        index.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        index.extend_from_slice(&(dims as u32).to_le_bytes());
        index.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        let mut docstore = String::new();
        for e in &entries {
            if e.vector.len() != dims {
                return Err(Error::BackendUnavailable(format!(
                    "vector for {} has {} dims, expected {}",
                    e.document.id,
                    e.vector.len(),
                    dims
                )));
            }
            index.extend_from_slice(&vec_to_blob(&e.vector));
            docstore.push_str(&serde_json::to_string(&e.document).map_err(Error::backend)?);
            docstore.push('\n');
        }

        write_atomic(&self.dir.join(INDEX_FILE), &index).await?;
        write_atomic(&self.dir.join(DOCSTORE_FILE), docstore.as_bytes()).await?;
        debug!(dir = %self.dir.display(), documents = entries.len(), "saved flat index");
        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(Error::backend)?;
    tokio::fs::rename(&tmp, path).await.map_err(Error::backend)?;
    Ok(())
}

async fn load(dir: &Path, expected_dims: usize) -> Result<Vec<FlatEntry>> {
    let corrupt = |msg: String| Error::BackendUnavailable(format!("{}: {}", dir.display(), msg));

    let index = tokio::fs::read(dir.join(INDEX_FILE))
        .await
        .map_err(Error::backend)?;
    if index.len() < HEADER_LEN || &index[..4] != MAGIC {
        return Err(corrupt("not a flat index file".to_string()));
    }
    let u32_at = |at: usize| u32::from_le_bytes([index[at], index[at + 1], index[at + 2], index[at + 3]]);
    let version = u32_at(4);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", version)));
    }
    let dims = u32_at(8) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&index[12..20]);
    let count = usize::try_from(u64::from_le_bytes(count_bytes))
        .map_err(|_| corrupt("entry count does not fit in memory".to_string()))?;

    if dims == 0 {
        return Err(corrupt("index has zero dimensions".to_string()));
    }
    if dims != expected_dims {
        return Err(corrupt(format!(
            "index has {} dims but the embedder produces {}",
            dims, expected_dims
        )));
    }
    let expected_len = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(|| corrupt(format!("entry count {} is out of range", count)))?;
    if index.len() != expected_len {
        return Err(corrupt("index file is truncated".to_string()));
    }

    let docstore = tokio::fs::read_to_string(dir.join(DOCSTORE_FILE))
        .await
        .map_err(Error::backend)?;
    let documents: Vec<Document> = docstore
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Error::backend))
        .collect::<Result<_>>()?;
    if documents.len() != count {
        return Err(corrupt(format!(
            "index holds {} vectors but docstore holds {} documents",
            count,
            documents.len()
        )));
    }

    let vectors = index[HEADER_LEN..].chunks_exact(dims * 4);
    Ok(documents
        .into_iter()
        .zip(vectors)
        .map(|(document, bytes)| FlatEntry {
            document,
            vector: blob_to_vec(bytes),
        })
        .collect())
}

#[async_trait]
impl VectorIndex for FlatStore {
    fn backend(&self) -> &'static str {
        "flat"
    }

    async fn add_documents(&self, docs: &[Document]) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let before = self.inner.count().await?;
        let n = self.inner.add_documents(docs).await?;
        if let Err(e) = self.save_locked().await {
            self.inner.truncate(before)?;
            return Err(e);
        }
        Ok(n)
    }

    async fn search(
        &self,
        query: &str,
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        self.inner.search(query, filter, top_k).await
    }

    async fn fetch(&self, filter: &Filter, limit: usize) -> Result<Vec<Document>> {
        self.inner.fetch(filter, limit).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let before = self.inner.snapshot()?;
        self.inner.reset().await?;
        if let Err(e) = self.save_locked().await {
            self.inner.restore(before)?;
            return Err(e);
        }
        Ok(())
    }
}
