//! CLI Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A CLI error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for CLI commands.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration could not be loaded")]
    Config,
    /// The engine reported a failure; its message is safe to print.
    #[display("{_0}")]
    Engine(#[error(not(source))] String),
    #[display("could not read {}", _0.display())]
    ReadInput(#[error(not(source))] PathBuf),
    #[display("could not write {}", _0.display())]
    WriteOutput(#[error(not(source))] PathBuf),
    #[display("could not print result")]
    Print,
}
