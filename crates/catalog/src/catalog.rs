//! The authoritative set of file records.

use crate::document::{JsonDocument, Snapshot};
use crate::error::{ErrorKind, Result};
use crate::models::{FileId, FileRecord, NewFile, TrashState};
use crate::query::{Filter, Page, Query, paginate};
use exn::OptionExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tagd_expr::{TagId, TagSet};
use tagd_storage::BackendHandle;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

fn first_id() -> FileId {
    1
}

/// On-disk shape of the files document.
#[derive(Debug, Serialize, Deserialize)]
struct FilesDocument {
    #[serde(default = "first_id")]
    next_id: FileId,
    #[serde(default)]
    files: Vec<FileRecord>,
}

impl Default for FilesDocument {
    fn default() -> Self {
        Self { next_id: first_id(), files: Vec::new() }
    }
}

#[derive(Serialize)]
struct FilesDocumentRef<'a> {
    next_id: FileId,
    files: Vec<&'a FileRecord>,
}

struct State {
    /// Bumped on every in-memory change; orders flushes.
    generation: u64,
    next_id: FileId,
    files: BTreeMap<FileId, FileRecord>,
}

impl State {
    fn snapshot(&mut self) -> Result<Snapshot> {
        self.generation += 1;
        let document = FilesDocumentRef { next_id: self.next_id, files: self.files.values().collect() };
        Snapshot::encode(self.generation, &document)
    }
}

/// File metadata catalog.
///
/// Readers share a [`RwLock`]; every mutation takes it exclusively just long
/// enough to change the in-memory map and serialize a snapshot, then writes
/// the snapshot with the lock released. When that write fails the change is
/// rolled back, unless another mutation has already touched the same record.
pub struct Catalog {
    state: RwLock<State>,
    document: JsonDocument,
}

impl Catalog {
    /// Loads the catalog from `path` inside `backend`; a missing document
    /// yields an empty catalog.
    #[instrument(name = "Catalog::open", skip_all, fields(backend = backend.name()))]
    pub async fn open(backend: BackendHandle, path: impl Into<PathBuf>) -> Result<Self> {
        let document = JsonDocument::new(backend, path);
        let loaded: FilesDocument = document.load().await?;
        let files: BTreeMap<_, _> = loaded.files.into_iter().map(|record| (record.id, record)).collect();
        // A hand-edited or truncated document could carry a counter behind
        // the records; identifiers must never be handed out twice.
        let next_id = files.keys().next_back().map_or(first_id(), |id| id + 1).max(loaded.next_id);
        info!(files = files.len(), next_id, "loaded file catalog");
        Ok(Self { state: RwLock::new(State { generation: 0, next_id, files }), document })
    }

    async fn commit(&self, snapshot: Snapshot) -> Result<()> {
        self.document.commit(snapshot).await
    }

    /// Puts `previous` back in place of `expected`, as long as the record
    /// still looks the way the failed mutation left it.
    async fn restore(&self, id: FileId, expected: Option<&FileRecord>, previous: Option<FileRecord>) {
        let snapshot = {
            let mut state = self.state.write().await;
            if state.files.get(&id) != expected {
                debug!(id, "record changed since the failed flush, not rolling back");
                return;
            }
            match previous {
                Some(previous) => state.files.insert(id, previous),
                None => state.files.remove(&id),
            };
            state.snapshot()
        };
        // Best effort: a newer snapshot may have reached disk in the meantime
        // and still contain the change that was just undone.
        if let Err(err) = async { self.commit(snapshot?).await }.await {
            warn!(id, error = ?err, "could not persist rollback");
        }
    }

    /// Hands out the next file identifier. Identifiers are never reused, even
    /// when the upload they were reserved for fails.
    pub async fn reserve_id(&self) -> FileId {
        let mut state = self.state.write().await;
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    /// Stores a new record under an identifier from [`reserve_id`](Self::reserve_id).
    #[instrument(skip(self, file), fields(name = %file.filename))]
    pub async fn add_file(&self, id: FileId, file: NewFile) -> Result<FileRecord> {
        let (record, snapshot) = {
            let mut state = self.state.write().await;
            if state.files.contains_key(&id) {
                exn::bail!(ErrorKind::Internal(format!("file identifier {id} is already in use")));
            }
            let record = file.into_record(id, OffsetDateTime::now_utc());
            state.files.insert(id, record.clone());
            state.next_id = state.next_id.max(id + 1);
            match state.snapshot() {
                Ok(snapshot) => (record, snapshot),
                Err(err) => {
                    state.files.remove(&id);
                    return Err(err);
                },
            }
        };
        if let Err(err) = self.commit(snapshot).await {
            self.restore(id, Some(&record), None).await;
            return Err(err);
        }
        debug!(id, bytes = record.size, "added file");
        Ok(record)
    }

    /// Reserves an identifier and stores the record in one go.
    pub async fn add(&self, file: NewFile) -> Result<FileRecord> {
        let id = self.reserve_id().await;
        self.add_file(id, file).await
    }

    /// Applies `mutate` to one record and persists the result. Nothing is
    /// written when the record didn't actually change.
    async fn update<F>(&self, id: FileId, mutate: F) -> Result<FileRecord>
    where
        F: FnOnce(&mut FileRecord),
    {
        let (previous, updated, snapshot) = {
            let mut state = self.state.write().await;
            let record = state.files.get_mut(&id).ok_or_raise(|| ErrorKind::NotFound(id))?;
            let previous = record.clone();
            mutate(record);
            let updated = record.clone();
            if updated == previous {
                return Ok(updated);
            }
            match state.snapshot() {
                Ok(snapshot) => (previous, updated, snapshot),
                Err(err) => {
                    state.files.insert(id, previous);
                    return Err(err);
                },
            }
        };
        if let Err(err) = self.commit(snapshot).await {
            self.restore(id, Some(&updated), Some(previous)).await;
            return Err(err);
        }
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn rename(&self, id: FileId, name: &str) -> Result<FileRecord> {
        let name = name.trim();
        if name.is_empty() {
            exn::bail!(ErrorKind::Validation("filename must not be empty".to_string()));
        }
        self.update(id, |record| record.filename = name.to_string()).await
    }

    #[instrument(skip(self, description))]
    pub async fn change_description(&self, id: FileId, description: &str) -> Result<FileRecord> {
        self.update(id, |record| record.description = description.to_string()).await
    }

    /// Replaces the tag set. Callers are expected to have dropped unknown
    /// tags already.
    #[instrument(skip(self))]
    pub async fn change_tags(&self, id: FileId, tags: TagSet) -> Result<FileRecord> {
        self.update(id, |record| record.tags = tags).await
    }

    /// Moves a file to the trash. Trashing a trashed file keeps its original
    /// timestamp.
    #[instrument(skip(self))]
    pub async fn trash(&self, id: FileId) -> Result<FileRecord> {
        self.update(id, |record| {
            if !record.is_trashed() {
                record.trash = TrashState::Trashed { since: OffsetDateTime::now_utc() };
            }
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn recover(&self, id: FileId) -> Result<FileRecord> {
        self.update(id, |record| record.trash = TrashState::Active).await
    }

    /// Drops a record for good. The payload is the caller's business.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: FileId) -> Result<FileRecord> {
        self.remove_if(id, |_| true).await?.ok_or_raise(|| ErrorKind::NotFound(id))
    }

    /// Drops a record only if it is still in the trash and went there
    /// strictly before `cutoff`. Returns `None` when the record is gone or no
    /// longer qualifies, e.g. because it was recovered in the meantime.
    #[instrument(skip(self))]
    pub async fn remove_expired(&self, id: FileId, cutoff: OffsetDateTime) -> Result<Option<FileRecord>> {
        match self.remove_if(id, |record| record.trash.since().is_some_and(|since| since < cutoff)).await {
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(None),
            other => other,
        }
    }

    /// Removes the record when `eligible` holds for it; the check and the
    /// removal happen under one exclusive lock.
    async fn remove_if<F>(&self, id: FileId, eligible: F) -> Result<Option<FileRecord>>
    where
        F: FnOnce(&FileRecord) -> bool,
    {
        let (removed, snapshot) = {
            let mut state = self.state.write().await;
            let record = state.files.get(&id).ok_or_raise(|| ErrorKind::NotFound(id))?;
            if !eligible(record) {
                return Ok(None);
            }
            let Some(removed) = state.files.remove(&id) else {
                return Ok(None);
            };
            match state.snapshot() {
                Ok(snapshot) => (removed, snapshot),
                Err(err) => {
                    state.files.insert(id, removed);
                    return Err(err);
                },
            }
        };
        if let Err(err) = self.commit(snapshot).await {
            self.restore(id, None, Some(removed)).await;
            return Err(err);
        }
        debug!(id, "removed file record");
        Ok(Some(removed))
    }

    /// Strips a (deleted) tag from every record and returns how many records
    /// changed. Never fails: a flush error is logged and the next successful
    /// flush persists the change.
    #[instrument(skip(self))]
    pub async fn remove_tag_from_all(&self, tag: TagId) -> usize {
        let (changed, snapshot) = {
            let mut state = self.state.write().await;
            let changed = state.files.values_mut().map(|record| record.tags.remove(&tag)).filter(|removed| *removed).count();
            if changed == 0 {
                return 0;
            }
            (changed, state.snapshot())
        };
        if let Err(err) = async { self.commit(snapshot?).await }.await {
            warn!(tag, changed, error = ?err, "could not persist tag removal");
        }
        changed
    }

    pub async fn get(&self, id: FileId) -> Result<FileRecord> {
        self.state.read().await.files.get(&id).cloned().ok_or_raise(|| ErrorKind::NotFound(id))
    }

    /// Up to `n` active records, most recently added first.
    pub async fn list_recent(&self, n: usize) -> Vec<FileRecord> {
        let state = self.state.read().await;
        state.files.values().rev().filter(|record| !record.is_trashed()).take(n).cloned().collect()
    }

    /// Trashed records that went into the trash strictly before `cutoff`.
    pub async fn trashed_before(&self, cutoff: OffsetDateTime) -> Vec<FileRecord> {
        let state = self.state.read().await;
        state.files.values().filter(|record| record.trash.since().is_some_and(|since| since < cutoff)).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.files.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.files.is_empty()
    }

    /// Runs a query. See [`Query`] for the parameters.
    pub async fn query(&self, query: &Query) -> Result<Page> {
        self.run_query(query, None).await
    }

    /// Like [`query`](Self::query), but tags outside `known` are treated as
    /// absent from every record.
    pub async fn query_known(&self, query: &Query, known: &TagSet) -> Result<Page> {
        self.run_query(query, Some(known)).await
    }

    #[instrument(skip(self, known), fields(expression = %query.expression, search = %query.search))]
    async fn run_query(&self, query: &Query, known: Option<&TagSet>) -> Result<Page> {
        let filter = Filter::compile(query)?;
        let mut matches: Vec<FileRecord> = {
            let state = self.state.read().await;
            state.files.values().filter(|record| filter.matches(record, known)).cloned().collect()
        };
        query.sort.sort(&mut matches);
        let page = paginate(matches, query.offset, query.count);
        debug!(total = page.total(), "query complete");
        Ok(page)
    }

    /// Persists the current state, e.g. on shutdown.
    pub async fn flush(&self) -> Result<()> {
        let snapshot = self.state.write().await.snapshot()?;
        self.commit(snapshot).await
    }
}
