//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! The `Display` of every kind is safe to show to a caller: no filesystem
//! paths, no keys. The full error tree, including the storage errors that do
//! name paths, is for the logs.

use derive_more::{Display, Error};
use exn::ResultExt;
use tagd_catalog::error::{ErrorKind as CatalogErrorKind, Result as CatalogResult};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The catalog or tag registry refused or failed the operation. The
    /// inner kind says why (not found, bad query, storage failure, ...).
    #[display("{_0}")]
    Catalog(#[error(not(source))] CatalogErrorKind),
    /// Reading, writing or deleting a payload or preview failed.
    #[display("storage I/O failed")]
    StorageIo,
    /// The request itself is unacceptable.
    #[display("{_0}")]
    Validation(#[error(not(source))] String),
    /// Packing payloads into an archive failed.
    #[display("archive could not be built")]
    Archive,
    /// Generating an image preview failed. Never fatal for an upload.
    #[display("preview could not be generated")]
    Preview,
    /// The engine could not be set up from its configuration.
    #[display("engine could not be opened")]
    Open,
    #[display("internal error: {_0}")]
    Internal(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Catalog(kind) => kind.is_retryable(),
            Self::StorageIo => true,
            _ => false,
        }
    }

    /// Returns `true` when the failure is a missing file record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Catalog(CatalogErrorKind::NotFound(_)))
    }
}

pub(crate) trait CatalogResultExt<T> {
    /// Raises a catalog error as [`ErrorKind::Catalog`], keeping its kind
    /// visible to callers and its tree intact.
    fn or_catalog(self) -> Result<T>;
}

impl<T> CatalogResultExt<T> for CatalogResult<T> {
    fn or_catalog(self) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => {
                let kind = ErrorKind::Catalog((*err).clone());
                Err(err).or_raise(|| kind)
            },
        }
    }
}
