//! ZIP upload ingest
//!
//! Reads an uploaded archive in memory, filters and validates entries,
//! hashes and text-extracts each file, then stores it and creates its rows.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dd_common::config::IngestConfig;

use crate::db;
use crate::models::{ClassificationStatus, Document, DocumentVersion, TextStatus};
use crate::services::document_store::DocumentStore;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid ZIP archive: {0}")]
    InvalidArchive(String),

    #[error("Unsafe path in archive: {0}")]
    UnsafePath(String),

    #[error("Archive contains more than {limit} files")]
    TooManyFiles { limit: usize },

    #[error("Archive expands to more than {limit_mb} MB")]
    TooLarge { limit_mb: u64 },

    #[error("Archive contains no documents")]
    Empty,

    #[error(transparent)]
    Storage(#[from] dd_common::Error),
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Storage(err.into())
    }
}

/// Archive limits
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub max_files: usize,
    pub max_total_bytes: u64,
}

impl From<&IngestConfig> for IngestLimits {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_files: config.max_files,
            max_total_bytes: config.max_total_uncompressed_mb.saturating_mul(1024 * 1024),
        }
    }
}

/// One hashed and text-extracted archive file
#[derive(Debug, Clone)]
pub struct PreparedEntry {
    /// Normalised `/`-separated path inside the archive
    pub path: String,
    pub file_name: String,
    pub extension: String,
    pub bytes: Vec<u8>,
    pub sha256: String,
    pub mime_type: Option<String>,
    pub text_status: TextStatus,
    pub text: Option<String>,
}

impl PreparedEntry {
    /// Directory part of the path, `None` at the archive root
    pub fn directory(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(dir, _)| dir)
    }
}

/// Parsed upload
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub entries: Vec<PreparedEntry>,
    /// Skipped entry names (OS metadata)
    pub skipped: Vec<String>,
    /// SHA-256 of the whole archive
    pub archive_sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn is_os_metadata(path: &str) -> bool {
    path.starts_with("__MACOSX/")
        || path.contains("/__MACOSX/")
        || path.rsplit('/').next().is_some_and(|name| name == ".DS_Store")
}

/// Read and validate every file entry of an archive
pub fn read_archive(bytes: &[u8], limits: IngestLimits) -> Result<Upload, IngestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| IngestError::InvalidArchive(e.to_string()))?;

    let mut raw = Vec::new();
    let mut skipped = Vec::new();
    let mut total: u64 = 0;

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| IngestError::InvalidArchive(e.to_string()))?;

        let raw_name = file.name().to_string();
        if file.is_dir() {
            continue;
        }

        let Some(enclosed) = file.enclosed_name() else {
            return Err(IngestError::UnsafePath(raw_name));
        };
        let path = enclosed
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if is_os_metadata(&path) {
            skipped.push(raw_name);
            continue;
        }

        if raw.len() >= limits.max_files {
            return Err(IngestError::TooManyFiles {
                limit: limits.max_files,
            });
        }

        // Declared size may lie; cap the actual read as well
        let remaining = limits.max_total_bytes.saturating_sub(total);
        if file.size() > remaining {
            return Err(IngestError::TooLarge {
                limit_mb: limits.max_total_bytes / (1024 * 1024),
            });
        }
        let mut content = Vec::with_capacity(file.size() as usize);
        (&mut file)
            .take(remaining + 1)
            .read_to_end(&mut content)
            .map_err(|e| IngestError::InvalidArchive(format!("{}: {}", raw_name, e)))?;
        if content.len() as u64 > remaining {
            return Err(IngestError::TooLarge {
                limit_mb: limits.max_total_bytes / (1024 * 1024),
            });
        }
        total += content.len() as u64;

        raw.push((path, content));
    }

    if raw.is_empty() {
        return Err(IngestError::Empty);
    }

    let entries = raw
        .into_iter()
        .map(|(path, content)| prepare_entry(path, content))
        .collect();

    Ok(Upload {
        entries,
        skipped,
        archive_sha256: sha256_hex(bytes),
    })
}

/// Parse an upload off the async runtime
pub async fn load_upload(bytes: axum::body::Bytes, limits: IngestLimits) -> Result<Upload, IngestError> {
    tokio::task::spawn_blocking(move || read_archive(&bytes, limits))
        .await
        .map_err(|e| IngestError::Storage(dd_common::Error::Internal(format!("Ingest task failed: {}", e))))?
}

fn prepare_entry(path: String, bytes: Vec<u8>) -> PreparedEntry {
    let file_name = path.rsplit('/').next().unwrap_or(&path).to_string();
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let mime_type = infer::get(&bytes).map(|kind| kind.mime_type().to_string());
    let (text_status, text) = extract_text(&extension, &bytes);

    debug!(path = %path, ?text_status, "Prepared archive entry");

    PreparedEntry {
        sha256: sha256_hex(&bytes),
        path,
        file_name,
        extension,
        bytes,
        mime_type,
        text_status,
        text,
    }
}

// ============================================================================
// Text extraction
// ============================================================================

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static PARAGRAPH_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</w:p>|<w:br\s*/>|<w:tab\s*/>").expect("valid regex"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("valid regex"));

fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn strip_markup(markup: &str) -> String {
    let without_tags = TAG.replace_all(markup, " ");
    let collapsed = BLANK_RUNS.replace_all(&without_tags, " ");
    unescape_entities(collapsed.trim())
}

fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;

    let with_breaks = PARAGRAPH_END.replace_all(&xml, "\n");
    Ok(with_breaks
        .lines()
        .map(strip_markup)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Extract plain text by extension
pub fn extract_text(extension: &str, bytes: &[u8]) -> (TextStatus, Option<String>) {
    let result = match extension {
        "txt" | "md" | "csv" | "json" | "log" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "html" | "htm" | "xml" => Ok(strip_markup(&String::from_utf8_lossy(bytes))),
        "docx" => docx_text(bytes),
        _ => return (TextStatus::Unsupported, None),
    };

    match result {
        Ok(text) if text.trim().is_empty() => (TextStatus::Empty, None),
        Ok(text) => (TextStatus::Extracted, Some(text)),
        Err(e) => {
            warn!(extension, error = %e, "Text extraction failed");
            (TextStatus::Failed, None)
        }
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Create container folders for every directory of the upload
///
/// Returns folder ids keyed by directory path.
pub async fn create_container_folders(
    pool: &SqlitePool,
    dd_id: Uuid,
    entries: &[PreparedEntry],
) -> Result<BTreeMap<String, Uuid>, IngestError> {
    let mut folders: BTreeMap<String, Uuid> = BTreeMap::new();

    for dir in entries.iter().filter_map(|e| e.directory()) {
        let mut path = String::new();
        let mut parent = None;
        for segment in dir.split('/') {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);

            let id = match folders.get(&path) {
                Some(id) => *id,
                None => {
                    let folder =
                        db::documents::get_or_create_folder(pool, dd_id, parent, segment, &path, false)
                            .await?;
                    folders.insert(path.clone(), folder.id);
                    folder.id
                }
            };
            parent = Some(id);
        }
    }

    Ok(folders)
}

/// Store bytes and text of an entry under a document id
pub async fn store_entry(
    store: &DocumentStore,
    dd_id: Uuid,
    document_id: Uuid,
    entry: &PreparedEntry,
) -> Result<String, IngestError> {
    let storage_path = DocumentStore::storage_path(dd_id, document_id, &entry.extension);
    store.write(&storage_path, &entry.bytes).await?;
    if let Some(text) = &entry.text {
        store.write_text(dd_id, document_id, text).await?;
    }
    Ok(storage_path)
}

/// Insert a new document (version 1) for an entry
pub async fn insert_entry(
    pool: &SqlitePool,
    store: &DocumentStore,
    dd_id: Uuid,
    folder_id: Option<Uuid>,
    entry: &PreparedEntry,
) -> Result<Document, IngestError> {
    let id = Uuid::new_v4();
    let storage_path = store_entry(store, dd_id, id, entry).await?;
    let now = Utc::now();

    let document = Document {
        id,
        dd_id,
        folder_id,
        original_path: entry.path.clone(),
        file_name: entry.file_name.clone(),
        extension: entry.extension.clone(),
        size_bytes: entry.bytes.len() as i64,
        sha256: entry.sha256.clone(),
        storage_path,
        mime_type: entry.mime_type.clone(),
        text_status: entry.text_status,
        ai_category: None,
        ai_confidence: None,
        classification_status: ClassificationStatus::Pending,
        version: 1,
        created_at: now,
        updated_at: now,
    };

    db::documents::insert_document(pool, &document).await?;
    db::documents::insert_version(
        pool,
        &DocumentVersion {
            id: Uuid::new_v4(),
            document_id: id,
            version: 1,
            sha256: document.sha256.clone(),
            size_bytes: document.size_bytes,
            recorded_at: now,
        },
    )
    .await?;

    Ok(document)
}

/// Store every entry of a first upload
pub async fn ingest_upload(
    pool: &SqlitePool,
    store: &DocumentStore,
    dd_id: Uuid,
    upload: &Upload,
) -> Result<Vec<Document>, IngestError> {
    let folders = create_container_folders(pool, dd_id, &upload.entries).await?;

    let mut documents = Vec::with_capacity(upload.entries.len());
    for entry in &upload.entries {
        let folder_id = entry.directory().and_then(|dir| folders.get(dir).copied());
        documents.push(insert_entry(pool, store, dd_id, folder_id, entry).await?);
    }

    info!(
        dd_id = %dd_id,
        documents = documents.len(),
        skipped = upload.skipped.len(),
        "Upload ingested"
    );

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn limits() -> IngestLimits {
        IngestLimits {
            max_files: 10,
            max_total_bytes: 1024 * 1024,
        }
    }

    #[test]
    fn test_reads_files_and_skips_os_metadata() {
        let bytes = build_zip(&[
            ("Contracts/spa.txt", b"Share purchase agreement"),
            ("__MACOSX/Contracts/._spa.txt", b"junk"),
            ("Contracts/.DS_Store", b"junk"),
            ("notes.md", b"# Notes"),
        ]);

        let upload = read_archive(&bytes, limits()).unwrap();
        let paths: Vec<_> = upload.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Contracts/spa.txt", "notes.md"]);
        assert_eq!(upload.skipped.len(), 2);
        assert_eq!(upload.entries[0].directory(), Some("Contracts"));
        assert_eq!(upload.entries[1].directory(), None);
        assert_eq!(upload.entries[0].text_status, TextStatus::Extracted);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let bytes = build_zip(&[("../../etc/passwd", b"root")]);
        assert!(matches!(
            read_archive(&bytes, limits()),
            Err(IngestError::UnsafePath(_))
        ));
    }

    #[test]
    fn test_enforces_file_count_limit() {
        let bytes = build_zip(&[("a.txt", b"a"), ("b.txt", b"b"), ("c.txt", b"c")]);
        let limits = IngestLimits {
            max_files: 2,
            max_total_bytes: 1024,
        };
        assert!(matches!(
            read_archive(&bytes, limits),
            Err(IngestError::TooManyFiles { limit: 2 })
        ));
    }

    #[test]
    fn test_enforces_total_size_limit() {
        let big = vec![b'x'; 4096];
        let bytes = build_zip(&[("big.txt", &big)]);
        let limits = IngestLimits {
            max_files: 10,
            max_total_bytes: 1024,
        };
        assert!(matches!(
            read_archive(&bytes, limits),
            Err(IngestError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_rejects_garbage_and_empty_archives() {
        assert!(matches!(
            read_archive(b"not a zip", limits()),
            Err(IngestError::InvalidArchive(_))
        ));
        let only_metadata = build_zip(&[(".DS_Store", b"x")]);
        assert!(matches!(
            read_archive(&only_metadata, limits()),
            Err(IngestError::Empty)
        ));
    }

    #[test]
    fn test_extracts_docx_paragraphs() {
        let xml = br#"<?xml version="1.0"?><w:document><w:body><w:p><w:r><w:t>Termination &amp; Notice</w:t></w:r></w:p><w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p></w:body></w:document>"#;
        let docx = build_zip(&[("word/document.xml", xml)]);

        let (status, text) = extract_text("docx", &docx);
        assert_eq!(status, TextStatus::Extracted);
        assert_eq!(text.unwrap(), "Termination & Notice\nSecond paragraph");
    }

    #[test]
    fn test_extraction_statuses() {
        assert_eq!(extract_text("pdf", b"%PDF").0, TextStatus::Unsupported);
        assert_eq!(extract_text("txt", b"   \n").0, TextStatus::Empty);
        assert_eq!(extract_text("docx", b"not a zip").0, TextStatus::Failed);
        let (status, text) = extract_text("html", b"<p>Hello <b>world</b></p>");
        assert_eq!(status, TextStatus::Extracted);
        assert_eq!(text.unwrap(), "Hello world");
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
