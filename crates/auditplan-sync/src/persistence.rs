//! Local document persistence: one snapshot blob per document id plus a
//! small JSON metadata map, under a named directory.
//!
//! Writes go through a temp file and rename so a crash mid-write leaves the
//! previous snapshot intact. Failures never take the in-memory document
//! down; the service records them in its status and carries on.

use std::path::PathBuf;

use serde_json::Value;
use std::collections::BTreeMap;
use tokio::fs;
use tracing::debug;

use crate::PersistenceError;

/// Reported persistence state, mirrored into the service status surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistenceStatus {
    pub enabled: bool,
    /// The local store has been loaded into the replica
    pub synced: bool,
    pub name: String,
}

/// File-backed persistence sink.
#[derive(Clone, Debug)]
pub struct DocumentPersistence {
    directory: PathBuf,
    name: String,
}

impl DocumentPersistence {
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn store_dir(&self) -> PathBuf {
        self.directory.join(&self.name)
    }

    fn blob_path(&self, document_id: &str) -> PathBuf {
        self.store_dir().join(format!("{document_id}.doc"))
    }

    fn metadata_path(&self, document_id: &str) -> PathBuf {
        self.store_dir().join(format!("{document_id}.meta.json"))
    }

    /// Persist a snapshot blob for a document.
    pub async fn store(&self, document_id: &str, bytes: &[u8]) -> Result<(), PersistenceError> {
        fs::create_dir_all(self.store_dir()).await?;
        let path = self.blob_path(document_id);
        let tmp = path.with_extension("doc.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!(document = document_id, bytes = bytes.len(), "stored snapshot");
        Ok(())
    }

    /// Load the snapshot blob, if one was ever stored.
    pub async fn load(&self, document_id: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(self.blob_path(document_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Io(e)),
        }
    }

    pub async fn set_metadata(
        &self,
        document_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), PersistenceError> {
        let mut metadata = self.read_metadata(document_id).await?;
        metadata.insert(key.to_string(), value);
        fs::create_dir_all(self.store_dir()).await?;
        let encoded = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| PersistenceError::Encoding(e.to_string()))?;
        fs::write(self.metadata_path(document_id), encoded).await?;
        Ok(())
    }

    pub async fn get_metadata(
        &self,
        document_id: &str,
        key: &str,
    ) -> Result<Option<Value>, PersistenceError> {
        Ok(self.read_metadata(document_id).await?.remove(key))
    }

    async fn read_metadata(
        &self,
        document_id: &str,
    ) -> Result<BTreeMap<String, Value>, PersistenceError> {
        match fs::read(self.metadata_path(document_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| PersistenceError::Encoding(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(PersistenceError::Io(e)),
        }
    }

    /// Remove everything stored for a document.
    pub async fn clear(&self, document_id: &str) -> Result<(), PersistenceError> {
        for path in [self.blob_path(document_id), self.metadata_path(document_id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PersistenceError::Io(e)),
            }
        }
        Ok(())
    }
}
