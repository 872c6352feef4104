//! Sliding-window character chunker.
//!
//! Splits extracted text into fixed-size windows measured in characters,
//! with adjacent windows sharing exactly `chunk_overlap` characters.
//!
//! # Algorithm
//!
//! 1. Start a window at offset `start` and take up to `chunk_size` characters.
//! 2. If the window does not reach the end of the text, try to pull its end
//!    back to just after a newline, then to just after any whitespace, as
//!    long as the window stays longer than both `chunk_overlap` and half of
//!    `chunk_size`.
//! 3. The next window starts exactly `chunk_overlap` characters before the
//!    previous one ended.
//! 4. Stop once a window reaches the end of the text.
//!
//! Because every boundary overlaps by exactly `chunk_overlap` characters,
//! dropping the first `chunk_overlap` characters of every chunk after the
//! first and concatenating reconstructs the source text exactly
//! (see [`reassemble`]).
//!
//! # Example
//!
//! ```rust
//! use concierge_core::chunk::{reassemble, split_text};
//!
//! let text = "alpha beta gamma delta epsilon zeta eta theta";
//! let chunks = split_text(text, 16, 4).unwrap();
//! assert!(chunks.len() > 1);
//! assert_eq!(reassemble(&chunks, 4), text);
//! ```

use crate::error::{Error, Result};
use crate::models::{keys, Document, Metadata};

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 300;
/// Default overlap between adjacent windows, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// One window of a split text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position in the chunk sequence, starting at 0.
    pub index: usize,
    /// Character offset of the first character in the source text.
    pub start_index: usize,
    pub text: String,
}

/// Split `text` into overlapping character windows.
///
/// Returns an empty vector for empty text.
///
/// # Errors
///
/// [`Error::InvalidArgument`] when `chunk_size == 0` or
/// `chunk_overlap >= chunk_size`.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<TextChunk>> {
    if chunk_size == 0 {
        return Err(Error::InvalidArgument("chunk_size must be > 0".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(Error::InvalidArgument(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            chunk_overlap, chunk_size
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < total {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end < total {
            let floor = start + chunk_overlap.max(chunk_size / 2);
            soft_break(&chars, floor, hard_end).unwrap_or(hard_end)
        } else {
            total
        };

        chunks.push(TextChunk {
            index: chunks.len(),
            start_index: start,
            text: chars[start..end].iter().collect(),
        });

        if end == total {
            break;
        }
        start = end - chunk_overlap;
    }

    Ok(chunks)
}

/// Find the latest cut point in `(floor, hard_end]` that falls right
/// after a newline, else right after any whitespace.
fn soft_break(chars: &[char], floor: usize, hard_end: usize) -> Option<usize> {
    if floor >= hard_end {
        return None;
    }
    let candidates = (floor + 1..=hard_end).rev();
    candidates
        .clone()
        .find(|&p| chars[p - 1] == '\n')
        .or_else(|| candidates.clone().find(|&p| chars[p - 1].is_whitespace()))
}

/// Rebuild the source text from its chunks by dropping the shared
/// `chunk_overlap` prefix of every chunk after the first.
pub fn reassemble(chunks: &[TextChunk], chunk_overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(chunk_overlap));
        }
    }
    out
}

/// Split `text` and turn every window into a [`Document`].
///
/// Each document carries a copy of `base` plus `chunk_index` and
/// `start_index`.
pub fn chunk_documents(
    text: &str,
    base: &Metadata,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Document>> {
    let chunks = split_text(text, chunk_size, chunk_overlap)?;
    Ok(chunks
        .into_iter()
        .map(|c| {
            let mut doc = Document::new(c.text);
            doc.metadata = base.clone();
            doc.with_meta(keys::CHUNK_INDEX, c.index)
                .with_meta(keys::START_INDEX, c.start_index)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataValue;

    const SAMPLE: &str = "Concierge routes each query to one expert.\n\
        Experts answer from retrieved evidence, reranked for precision.\n\n\
        Ingestion walks a directory with a fixed number of workers, extracts \
        text from PDF, spreadsheet and image files, and writes the chunks once \
        the whole batch has finished. Failures are collected per file.";

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(split_text("", 300, 50).unwrap().is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_text("hello world", 300, 50).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].start_index, 0);
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(split_text("abc", 10, 10).is_err());
        assert!(split_text("abc", 0, 0).is_err());
    }

    #[test]
    fn test_chunks_respect_size() {
        let chunks = split_text(SAMPLE, 60, 10).unwrap();
        assert!(chunks.len() > 3);
        for c in &chunks {
            assert!(c.text.chars().count() <= 60);
        }
    }

    #[test]
    fn test_adjacent_chunks_share_overlap() {
        let overlap = 12;
        let chunks = split_text(SAMPLE, 70, overlap).unwrap();
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let tail: String = prev[prev.len() - overlap..].iter().collect();
            let head: String = pair[1].text.chars().take(overlap).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_roundtrip_reconstructs_source() {
        for (size, overlap) in [(300, 50), (40, 0), (25, 24), (7, 3), (1, 0)] {
            let chunks = split_text(SAMPLE, size, overlap).unwrap();
            assert_eq!(reassemble(&chunks, overlap), SAMPLE, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn test_roundtrip_multibyte() {
        let text = "知识库检索 ünïcödé text — with wide chars 🚀 and more words here";
        let chunks = split_text(text, 10, 3).unwrap();
        assert_eq!(reassemble(&chunks, 3), text);
    }

    #[test]
    fn test_prefers_whitespace_boundary() {
        let chunks = split_text("aaaa bbbb cccc dddd", 12, 2).unwrap();
        assert!(chunks[0].text.ends_with(' '));
    }

    #[test]
    fn test_start_index_tracks_source_offsets() {
        let chunks = split_text(SAMPLE, 50, 5).unwrap();
        let chars: Vec<char> = SAMPLE.chars().collect();
        for c in &chunks {
            let n = c.text.chars().count();
            let expected: String = chars[c.start_index..c.start_index + n].iter().collect();
            assert_eq!(expected, c.text);
        }
    }

    #[test]
    fn test_chunk_documents_attach_metadata() {
        let mut base = Metadata::new();
        base.insert(keys::CATEGORY.into(), "product".into());
        base.insert(keys::SOURCE.into(), "docs/a.md".into());
        let docs = chunk_documents(SAMPLE, &base, 80, 10).unwrap();
        for (i, d) in docs.iter().enumerate() {
            assert_eq!(d.get_str(keys::CATEGORY), Some("product"));
            assert_eq!(d.get_str(keys::SOURCE), Some("docs/a.md"));
            assert_eq!(d.get(keys::CHUNK_INDEX), Some(&MetadataValue::Int(i as i64)));
        }
    }
}
