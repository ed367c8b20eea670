//! Filesystem-backed paste storage.
//!
//! Each paste is a flat file named by its id inside the paste directory.
//! Writes go to a hidden temp file first and are renamed into place, so a
//! concurrent reader sees either nothing or the complete paste.

use crate::ids::PasteId;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, trace};

/// Storage failure, carrying the path that could not be accessed
#[derive(Debug, Error)]
#[error("paste store I/O error at '{}': {}", .path.display(), .source)]
pub struct StoreError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Paste directory handle
#[derive(Debug, Clone)]
pub struct PasteStore {
    root: PathBuf,
}

impl PasteStore {
    /// Open the store, creating the directory if it does not exist
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StoreError {
            path: root.clone(),
            source,
        })?;
        info!(path = %root.display(), "Opened paste store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &PasteId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Write `content` under `id`, replacing whatever was there
    pub async fn put(&self, id: &PasteId, content: &str) -> Result<(), StoreError> {
        let path = self.path_for(id);
        let tmp = self.root.join(format!(".{id}.tmp"));

        tokio::fs::write(&tmp, content.as_bytes())
            .await
            .map_err(|source| StoreError {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError {
                path: path.clone(),
                source,
            })?;

        trace!(%id, bytes = content.len(), "Paste written");
        Ok(())
    }

    /// Read the paste stored under `id`, or `None` if there is none
    pub async fn get(&self, id: &PasteId) -> Result<Option<String>, StoreError> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(decode_lossy(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError { path, source }),
        }
    }
}

/// Decode UTF-8, replacing invalid sequences with U+FFFD
pub fn decode_lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
