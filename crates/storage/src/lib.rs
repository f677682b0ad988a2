//! Payload storage for tagd.
//!
//! File payloads and previews are addressed by relative paths (usually just
//! the file identifier) inside a [`StorageBackend`]. Backends can be stacked:
//! [`EncryptedBackend`](backend::EncryptedBackend) wraps any other backend and
//! transparently encrypts everything written through it.

pub mod backend;
pub mod error;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
