//! Pluggable raw-blob storage (§4.1, §6 "Persisted layout").
//!
//! `LocalFsBlobStore` is the dev/default implementation; production object
//! storage is an external collaborator (§1) reached through the same
//! trait, not built here.

use crate::error::{AppError, AppResult};
use chrono::Utc;
use std::path::PathBuf;

pub trait BlobStore: Send + Sync {
    /// Write verbatim bytes for `data_type` and return the location string
    /// recorded on the SourceRef.
    fn put(&self, data_type: &str, bytes: &[u8]) -> AppResult<String>;
    fn get(&self, location: &str) -> AppResult<Vec<u8>>;
}

pub struct LocalFsBlobStore {
    root: PathBuf,
}

impl LocalFsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| AppError::TransientIo(format!("failed to create blob root: {e}")))?;
        Ok(Self { root })
    }
}

impl BlobStore for LocalFsBlobStore {
    fn put(&self, data_type: &str, bytes: &[u8]) -> AppResult<String> {
        let epoch_ms = Utc::now().timestamp_millis();
        let filename = format!("{data_type}_{epoch_ms}.json");
        let path = self.root.join(&filename);
        std::fs::write(&path, bytes)
            .map_err(|e| AppError::TransientIo(format!("failed to write blob {filename}: {e}")))?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn get(&self, location: &str) -> AppResult<Vec<u8>> {
        std::fs::read(location)
            .map_err(|e| AppError::TransientIo(format!("failed to read blob {location}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsBlobStore::new(dir.path()).unwrap();
        let location = store.put("products", b"hello").unwrap();
        assert!(location.contains("products_"));
        assert_eq!(store.get(&location).unwrap(), b"hello");
    }
}
