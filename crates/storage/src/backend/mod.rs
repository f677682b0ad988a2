//! Storage backend trait and implementations.
//!
//! Payloads are opaque byte blobs: the catalog decides what a path means, the
//! backend only stores bytes. [`LocalBackend`] keeps them on disk,
//! [`EncryptedBackend`] decorates any other backend with authenticated
//! encryption, and `MockBackend` (feature `mock`) keeps them in memory for
//! tests in this and other crates.

mod encrypted;
mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::encrypted::{EncryptedBackend, derive_key};
pub use self::local::LocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockBackend;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Unified interface for payload storage.
///
/// All paths are relative to the backend root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tagd_storage::{backend::StorageBackend, error::Result};
///
/// async fn payload_size(backend: &dyn StorageBackend, id: u64) -> Result<u64> {
///     let path = id.to_string();
///     if backend.exists(Path::new(&path)).await? {
///         Ok(backend.read(Path::new(&path)).await?.len() as u64)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read the complete file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, replacing any existing file.
    ///
    /// # Notes
    /// - Implementations create parent directories as needed.
    /// - A reader never observes a partially written file: either the old
    ///   contents or the new ones.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;
}
