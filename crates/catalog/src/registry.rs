//! Tag registry: identifier to name and color.

use crate::document::{JsonDocument, Snapshot};
use crate::error::{ErrorKind, Result};
use crate::models::{DEFAULT_TAG_COLOR, Tag};
use exn::OptionExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tagd_expr::{TagId, TagSet};
use tagd_storage::BackendHandle;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

fn first_id() -> TagId {
    1
}

#[derive(Debug, Serialize, Deserialize)]
struct TagsDocument {
    #[serde(default = "first_id")]
    next_id: TagId,
    #[serde(default)]
    tags: Vec<Tag>,
}

impl Default for TagsDocument {
    fn default() -> Self {
        Self { next_id: first_id(), tags: Vec::new() }
    }
}

#[derive(Serialize)]
struct TagsDocumentRef<'a> {
    next_id: TagId,
    tags: Vec<&'a Tag>,
}

struct State {
    generation: u64,
    next_id: TagId,
    tags: BTreeMap<TagId, Tag>,
}

impl State {
    fn snapshot(&mut self) -> Result<Snapshot> {
        self.generation += 1;
        Snapshot::encode(self.generation, &TagsDocumentRef { next_id: self.next_id, tags: self.tags.values().collect() })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Persistent registry of tags.
///
/// Removing a tag here does not touch any file; the engine follows up with
/// [`Catalog::remove_tag_from_all`](crate::Catalog::remove_tag_from_all).
pub struct TagRegistry {
    state: RwLock<State>,
    document: JsonDocument,
}

impl TagRegistry {
    #[instrument(name = "TagRegistry::open", skip_all, fields(backend = backend.name()))]
    pub async fn open(backend: BackendHandle, path: impl Into<PathBuf>) -> Result<Self> {
        let document = JsonDocument::new(backend, path);
        let loaded: TagsDocument = document.load().await?;
        let tags: BTreeMap<_, _> = loaded.tags.into_iter().map(|tag| (tag.id, tag)).collect();
        let next_id = tags.keys().next_back().map_or(first_id(), |id| id.saturating_add(1)).max(loaded.next_id);
        info!(tags = tags.len(), "loaded tag registry");
        Ok(Self { state: RwLock::new(State { generation: 0, next_id, tags }), document })
    }

    /// Writes a snapshot; on failure restores `previous` for `id` if the tag
    /// still holds `expected`.
    async fn persist(&self, snapshot: Result<Snapshot>, id: TagId, expected: Option<&Tag>, previous: Option<Tag>) -> Result<()> {
        let Err(err) = async { self.document.commit(snapshot?).await }.await else {
            return Ok(());
        };
        let rollback = {
            let mut state = self.state.write().await;
            if state.tags.get(&id) != expected {
                return Err(err);
            }
            match previous {
                Some(previous) => state.tags.insert(id, previous),
                None => state.tags.remove(&id),
            };
            state.snapshot()
        };
        if let Err(rollback_err) = async { self.document.commit(rollback?).await }.await {
            warn!(tag = id, error = ?rollback_err, "could not persist tag rollback");
        }
        Err(err)
    }

    /// All tags, ordered by identifier.
    pub async fn all(&self) -> Vec<Tag> {
        self.state.read().await.tags.values().cloned().collect()
    }

    pub async fn get(&self, id: TagId) -> Result<Tag> {
        self.state.read().await.tags.get(&id).cloned().ok_or_raise(|| ErrorKind::TagNotFound(id))
    }

    pub async fn contains(&self, id: TagId) -> bool {
        self.state.read().await.tags.contains_key(&id)
    }

    /// Identifiers of every registered tag.
    pub async fn ids(&self) -> TagSet {
        self.state.read().await.tags.keys().copied().collect()
    }

    /// Drops identifiers that aren't registered.
    pub async fn retain_known(&self, mut tags: TagSet) -> TagSet {
        let state = self.state.read().await;
        tags.retain(|id| state.tags.contains_key(id));
        tags
    }

    /// Registers a new tag. A missing or empty color becomes
    /// [`DEFAULT_TAG_COLOR`].
    #[instrument(skip(self))]
    pub async fn add(&self, name: &str, color: Option<&str>) -> Result<Tag> {
        let Some(name) = non_empty(Some(name)) else {
            exn::bail!(ErrorKind::Validation("tag name must not be empty".to_string()));
        };
        let color = non_empty(color).unwrap_or(DEFAULT_TAG_COLOR);
        let (tag, snapshot) = {
            let mut state = self.state.write().await;
            let id = state.next_id;
            let Some(next_id) = id.checked_add(1) else {
                exn::bail!(ErrorKind::Internal("tag identifiers exhausted".to_string()));
            };
            state.next_id = next_id;
            let tag = Tag { id, name: name.to_string(), color: color.to_string() };
            state.tags.insert(id, tag.clone());
            (tag, state.snapshot())
        };
        self.persist(snapshot, tag.id, Some(&tag), None).await?;
        Ok(tag)
    }

    /// Changes the name and/or color of a tag; `None` or empty values leave
    /// the field untouched.
    #[instrument(skip(self))]
    pub async fn change(&self, id: TagId, name: Option<&str>, color: Option<&str>) -> Result<Tag> {
        let (previous, tag, snapshot) = {
            let mut state = self.state.write().await;
            let tag = state.tags.get_mut(&id).ok_or_raise(|| ErrorKind::TagNotFound(id))?;
            let previous = tag.clone();
            if let Some(name) = non_empty(name) {
                tag.name = name.to_string();
            }
            if let Some(color) = non_empty(color) {
                tag.color = color.to_string();
            }
            let tag = tag.clone();
            if tag == previous {
                return Ok(tag);
            }
            (previous, tag, state.snapshot())
        };
        self.persist(snapshot, id, Some(&tag), Some(previous)).await?;
        Ok(tag)
    }

    /// Removes a tag and reports whether it existed.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: TagId) -> Result<bool> {
        let (removed, snapshot) = {
            let mut state = self.state.write().await;
            let Some(removed) = state.tags.remove(&id) else {
                return Ok(false);
            };
            (removed, state.snapshot())
        };
        self.persist(snapshot, id, None, Some(removed)).await?;
        Ok(true)
    }

    pub async fn flush(&self) -> Result<()> {
        let snapshot = self.state.write().await.snapshot()?;
        self.document.commit(snapshot).await
    }
}
