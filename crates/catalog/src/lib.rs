//! File metadata catalog for tagd.
//!
//! The [`Catalog`] owns every [`FileRecord`] and answers [`Query`]s over
//! them; the [`TagRegistry`] owns the tags those records refer to. Both
//! persist themselves as JSON documents in a storage backend and flush on
//! every mutation before reporting success.

mod catalog;
mod document;
pub mod error;
pub mod models;
mod query;
mod registry;

pub use crate::catalog::Catalog;
pub use crate::models::{FileId, FileRecord, NewFile, Tag, TrashState};
pub use crate::query::{Page, Query, SortKey, SortMode, SortOrder};
pub use crate::registry::TagRegistry;
pub use tagd_expr::{TagId, TagSet};
