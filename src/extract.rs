//! Text extraction keyed by file type.
//!
//! [`FileType::from_path`] maps an extension to one of four kinds:
//!
//! | Extensions | Kind | Extraction |
//! |------------|------|------------|
//! | `.pdf` | [`FileType::Pdf`] | `pdf-extract` |
//! | `.txt`, `.md`, `.markdown` | [`FileType::Text`] | lossy UTF-8 |
//! | `.xlsx`, `.xls` | [`FileType::Excel`] | `.xlsx` via `zip` + `quick-xml`; legacy `.xls` yields none |
//! | `.jpg`, `.jpeg`, `.png` | [`FileType::Image`] | optional external OCR command |
//!
//! Anything else is not extracted at all. Extractors return `Ok(None)`
//! for content they cannot read, and an [`ExtractError`] only when a file
//! of a supported kind is broken. Extraction is blocking; the ingestion
//! pipeline runs it on the blocking thread pool.

use std::io::Read;
use std::path::Path;
use std::process::Command;

use thiserror::Error;

/// Maximum sheets to read from one workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to read per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Pdf,
    Text,
    Excel,
    Image,
}

impl FileType {
    /// Kind of file by extension (case-insensitive), or `None` if unsupported.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileType::Pdf),
            "txt" | "md" | "markdown" => Some(FileType::Text),
            "xlsx" | "xls" => Some(FileType::Excel),
            "jpg" | "jpeg" | "png" => Some(FileType::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Text => "text",
            FileType::Excel => "excel",
            FileType::Image => "image",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
}

/// Turns a file into plain text.
pub trait Extractor: Send + Sync {
    /// `Ok(None)` when the content cannot be read as text.
    fn extract(&self, path: &Path, file_type: FileType) -> Result<Option<String>, ExtractError>;
}

/// The built-in extractor.
#[derive(Debug, Clone, Default)]
pub struct FileExtractor {
    ocr_command: Option<String>,
}

impl FileExtractor {
    pub fn new(ocr_command: Option<String>) -> Self {
        Self { ocr_command }
    }

    fn ocr(&self, path: &Path) -> Result<Option<String>, ExtractError> {
        let Some(cmd) = &self.ocr_command else {
            return Ok(None);
        };
        let output = Command::new(cmd)
            .arg(path)
            .output()
            .map_err(|e| ExtractError::Ocr(format!("{}: {}", cmd, e)))?;
        if !output.status.success() {
            return Err(ExtractError::Ocr(format!(
                "{} exited with {}: {}",
                cmd,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

impl Extractor for FileExtractor {
    fn extract(&self, path: &Path, file_type: FileType) -> Result<Option<String>, ExtractError> {
        match file_type {
            FileType::Text => {
                let bytes = std::fs::read(path)?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            FileType::Pdf => {
                let bytes = std::fs::read(path)?;
                pdf_extract::extract_text_from_mem(&bytes)
                    .map(Some)
                    .map_err(|e| ExtractError::Pdf(e.to_string()))
            }
            FileType::Excel => {
                let is_xlsx = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("xlsx"))
                    .unwrap_or(false);
                if !is_xlsx {
                    // Legacy binary workbooks are not supported.
                    return Ok(None);
                }
                let bytes = std::fs::read(path)?;
                extract_xlsx(&bytes).map(Some)
            }
            FileType::Image => self.ocr(path),
        }
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn spreadsheet_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Spreadsheet(e.to_string())
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(spreadsheet_err)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(spreadsheet_err)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Spreadsheet(format!(
            "{} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Render every sheet as text: one line per row, cells joined by `" | "`,
/// sheets separated by a blank line.
fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(spreadsheet_err)?;
    let shared = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        shared_strings(&read_entry(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };

    let mut sheets: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    sheets.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut rendered = Vec::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_entry(&mut archive, &name)?;
        let rows = sheet_rows(&xml, &shared)?;
        if !rows.is_empty() {
            rendered.push(rows.join("\n"));
        }
    }
    Ok(rendered.join("\n\n"))
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(spreadsheet_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Event::Text(t) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape().map_err(spreadsheet_err)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// How a cell's `<v>` value should be interpreted.
#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Literal,
}

fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut kind = CellKind::Literal;
    let mut in_value = false;
    let mut cells = 0usize;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf).map_err(spreadsheet_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    kind = CellKind::Literal;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Literal,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_value = true,
                _ => {}
            },
            Event::Text(t) if in_value => {
                let raw = t.unescape().map_err(spreadsheet_err)?;
                let value = raw.trim();
                let text = match kind {
                    CellKind::Shared => value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i))
                        .cloned(),
                    _ => Some(value.to_string()),
                };
                if let Some(text) = text.filter(|s| !s.is_empty()) {
                    row.push(text);
                    cells += 1;
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" if !row.is_empty() => rows.push(row.join(" | ")),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
