//! Catalog Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Messages are shown to callers as-is, so they name identifiers but never
//! filesystem paths. The storage error underneath a [`ErrorKind::StorageIo`]
//! (which does carry the path) stays in the error tree for logging.

use crate::models::FileId;
use derive_more::{Display, Error};
use tagd_expr::TagId;

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The tag expression of a query did not compile.
    #[display("invalid tag expression: {reason}")]
    BadExpressionSyntax {
        reason: String,
        /// Byte offset of the offending token.
        position: usize,
    },
    /// The search text of a regex query is not a valid pattern.
    #[display("invalid search pattern: {_0}")]
    BadSearchPattern(#[error(not(source))] String),
    #[display("file {_0} not found")]
    NotFound(#[error(not(source))] FileId),
    #[display("tag {_0} not found")]
    TagNotFound(#[error(not(source))] TagId),
    /// Caller supplied a value the catalog refuses to store.
    #[display("{_0}")]
    Validation(#[error(not(source))] String),
    /// Persisting (or loading) a metadata document failed. Any in-memory
    /// change has been rolled back.
    #[display("storage I/O failed")]
    StorageIo,
    #[display("internal error: {_0}")]
    Internal(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageIo)
    }
}
