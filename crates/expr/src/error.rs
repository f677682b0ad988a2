//! Expression Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An expression error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for expression compilation.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an expression failed to compile.
///
/// Positions are zero-based byte offsets into the original input.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input is not a well-formed expression. `token` is the offending
    /// token as written (`end of input` when the input stopped too early).
    #[display("unexpected {token} at position {position}")]
    BadSyntax {
        /// The offending token.
        token: String,
        /// Where the offending token starts.
        position: usize,
    },
    /// The expression is well-formed but larger or more deeply nested than
    /// the evaluator accepts.
    #[display("expression too complex at position {position}")]
    TooComplex {
        /// Where the limit was exceeded.
        position: usize,
    },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Compilation is pure: the same input always fails the same way.
        false
    }

    /// Byte offset of the problem in the original input.
    pub fn position(&self) -> usize {
        match self {
            Self::BadSyntax { position, .. } | Self::TooComplex { position } => *position,
        }
    }
}
