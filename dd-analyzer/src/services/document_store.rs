//! On-disk document store
//!
//! Layout under the documents directory:
//! - `<dd_id>/<document_id>.<ext>`: original bytes
//! - `<dd_id>/<document_id>.txt.extracted`: extracted text

use dd_common::Result;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative storage path of a document's bytes
    pub fn storage_path(dd_id: Uuid, document_id: Uuid, extension: &str) -> String {
        if extension.is_empty() {
            format!("{}/{}", dd_id, document_id)
        } else {
            format!("{}/{}.{}", dd_id, document_id, extension)
        }
    }

    fn text_path(&self, dd_id: Uuid, document_id: Uuid) -> PathBuf {
        self.root
            .join(dd_id.to_string())
            .join(format!("{}.txt.extracted", document_id))
    }

    pub async fn write(&self, storage_path: &str, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(storage_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn read(&self, storage_path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.root.join(storage_path)).await?)
    }

    pub async fn write_text(&self, dd_id: Uuid, document_id: Uuid, text: &str) -> Result<()> {
        let path = self.text_path(dd_id, document_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    /// Extracted text, `None` when the document has none
    pub async fn read_text(&self, dd_id: Uuid, document_id: Uuid) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.text_path(dd_id, document_id)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a document's bytes and text; missing files are ignored
    pub async fn remove_document(&self, dd_id: Uuid, document_id: Uuid, storage_path: &str) -> Result<()> {
        for path in [self.root.join(storage_path), self.text_path(dd_id, document_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Remove everything stored for a DD
    pub async fn remove_dd(&self, dd_id: Uuid) -> Result<()> {
        let dir = self.root.join(dd_id.to_string());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
