//! JSON metadata documents.
//!
//! The catalog and the tag registry each persist themselves as one JSON
//! document in a [`StorageBackend`](tagd_storage::StorageBackend). Every
//! snapshot carries the generation of the in-memory state it was taken
//! from, and [`JsonDocument::commit`] refuses to let an older snapshot
//! overwrite a newer one when concurrent flushes finish out of order.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tagd_storage::BackendHandle;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// A serialized state, ready to be committed.
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub generation: u64,
    pub bytes: Vec<u8>,
}

impl Snapshot {
    pub fn encode<T: Serialize + ?Sized>(generation: u64, value: &T) -> Result<Self> {
        let bytes = serde_json::to_vec_pretty(value)
            .or_raise(|| ErrorKind::Internal("metadata could not be serialized".to_string()))?;
        Ok(Self { generation, bytes })
    }
}

pub(crate) struct JsonDocument {
    backend: BackendHandle,
    path: PathBuf,
    /// Generation of the newest snapshot written so far.
    committed: Mutex<u64>,
}

impl JsonDocument {
    pub fn new(backend: BackendHandle, path: impl Into<PathBuf>) -> Self {
        Self { backend, path: path.into(), committed: Mutex::new(0) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the document. A missing document is an empty one.
    #[instrument(skip(self), fields(backend = self.backend.name(), path = %self.path.display()))]
    pub async fn load<T: DeserializeOwned + Default>(&self) -> Result<T> {
        let bytes = match self.backend.read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => {
                debug!("document does not exist yet, starting empty");
                return Ok(T::default());
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::StorageIo),
        };
        serde_json::from_slice(&bytes).or_raise(|| ErrorKind::Internal("metadata document is corrupt".to_string()))
    }

    /// Writes a snapshot unless a newer one has already been written.
    ///
    /// The lock is held across the write so two commits never race on the
    /// underlying file.
    pub async fn commit(&self, snapshot: Snapshot) -> Result<()> {
        let mut committed = self.committed.lock().await;
        if snapshot.generation <= *committed {
            debug!(
                generation = snapshot.generation,
                committed = *committed,
                "skipping stale snapshot of {}",
                self.path.display()
            );
            return Ok(());
        }
        self.backend.write(&self.path, &snapshot.bytes).await.or_raise(|| ErrorKind::StorageIo)?;
        *committed = snapshot.generation;
        Ok(())
    }
}
