//! The tagged file store engine.

use crate::archive::{self, ArchiveFormat, Entry};
use crate::batch::{Outcome, run_batch};
use crate::error::{CatalogResultExt, ErrorKind, Result};
use crate::media;
use crate::sweep::{SweepReport, Sweeper};
use exn::{OptionExt, ResultExt};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tagd_catalog::models::payload_path;
use tagd_catalog::{Catalog, FileId, FileRecord, NewFile, Page, Query, Tag, TagId, TagRegistry, TagSet};
use tagd_config::{Config, EngineConfig, TrashConfig};
use tagd_storage::BackendHandle;
use tagd_storage::backend::{EncryptedBackend, LocalBackend};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// A file to be uploaded.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// Name the file was uploaded with. Directory components are dropped
    /// from the display name.
    pub name: String,
    pub data: Vec<u8>,
    /// Requested tags; unknown ones are silently dropped.
    pub tags: TagSet,
    pub description: String,
}

/// Everything an [`Engine`] is built from.
pub struct Parts {
    pub catalog: Catalog,
    pub tags: TagRegistry,
    pub payloads: BackendHandle,
    pub previews: BackendHandle,
    pub settings: EngineConfig,
    pub trash: TrashConfig,
}

struct Inner {
    catalog: Catalog,
    tags: TagRegistry,
    payloads: BackendHandle,
    previews: BackendHandle,
    settings: EngineConfig,
    trash: TrashConfig,
    sweeper: Mutex<Option<Sweeper>>,
}

/// Handle to the store. Cheap to clone; every clone drives the same catalog.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

/// Non-owning handle held by background tasks.
pub(crate) struct WeakEngine(Weak<Inner>);

impl WeakEngine {
    pub(crate) fn upgrade(&self) -> Option<Engine> {
        self.0.upgrade().map(|inner| Engine { inner })
    }
}

fn preview_path(id: FileId) -> PathBuf {
    PathBuf::from(format!("{id}.jpg"))
}

fn local_backend(name: &str, dir: &Path) -> Result<BackendHandle> {
    let root = std::path::absolute(dir).or_raise(|| ErrorKind::Open)?;
    Ok(Arc::new(LocalBackend::new(name, root).or_raise(|| ErrorKind::Open)?))
}

/// Metadata documents are addressed as a file name inside a backend rooted
/// at their parent directory.
fn document_location(path: &Path) -> Result<(BackendHandle, PathBuf)> {
    let absolute = std::path::absolute(path).or_raise(|| ErrorKind::Open)?;
    let parent = absolute.parent().ok_or_raise(|| ErrorKind::Open)?;
    let name = absolute.file_name().ok_or_raise(|| ErrorKind::Open)?;
    Ok((local_backend("metadata", parent)?, PathBuf::from(name)))
}

async fn encrypted(inner: BackendHandle, passphrase: &str) -> Result<BackendHandle> {
    let backend = EncryptedBackend::with_passphrase(inner, passphrase).await.or_raise(|| ErrorKind::Open)?;
    Ok(Arc::new(backend))
}

/// Deletes a stored blob; one that is already gone counts as deleted.
async fn delete_blob(backend: &BackendHandle, path: &Path) -> Result<()> {
    match backend.delete(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_found() => {
            debug!(backend = backend.name(), "blob already gone");
            Ok(())
        },
        Err(err) => Err(err).or_raise(|| ErrorKind::StorageIo),
    }
}

impl Engine {
    pub fn new(parts: Parts) -> Self {
        let Parts { catalog, tags, payloads, previews, settings, trash } = parts;
        let inner = Inner { catalog, tags, payloads, previews, settings, trash, sweeper: Mutex::new(None) };
        Self { inner: Arc::new(inner) }
    }

    /// Opens the store described by `config` and starts the trash sweep.
    #[instrument(name = "Engine::open", skip_all)]
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Open)?;
        let storage = &config.storage;
        let mut payloads = local_backend("payloads", &storage.data_dir)?;
        let mut previews = local_backend("previews", &storage.preview_dir)?;
        if storage.encrypt {
            let passphrase = storage.passphrase.as_deref().ok_or_raise(|| ErrorKind::Open)?;
            payloads = encrypted(payloads, passphrase).await?;
            previews = encrypted(previews, passphrase).await?;
            info!("payload encryption enabled");
        }
        let (backend, path) = document_location(&storage.files_document)?;
        let catalog = Catalog::open(backend, path).await.or_catalog()?;
        let (backend, path) = document_location(&storage.tags_document)?;
        let tags = TagRegistry::open(backend, path).await.or_catalog()?;

        let engine = Self::new(Parts {
            catalog,
            tags,
            payloads,
            previews,
            settings: config.engine.clone(),
            trash: config.trash.clone(),
        });
        engine.start_sweeper().await;
        Ok(engine)
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine(Arc::downgrade(&self.inner))
    }

    /// Starts the periodic trash sweep unless it is already running.
    pub async fn start_sweeper(&self) {
        let mut sweeper = self.inner.sweeper.lock().await;
        if sweeper.is_none() {
            *sweeper = Some(Sweeper::spawn(self.downgrade(), self.inner.trash.sweep_interval()));
        }
    }

    /// Stops the trash sweep (waiting for a running pass) and flushes both
    /// metadata documents.
    #[instrument(name = "Engine::shutdown", skip_all)]
    pub async fn shutdown(&self) -> Result<()> {
        let sweeper = self.inner.sweeper.lock().await.take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        self.inner.catalog.flush().await.or_catalog()?;
        self.inner.tags.flush().await.or_catalog()?;
        info!("engine shut down");
        Ok(())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.inner.settings
    }

    // Queries

    /// Runs a query. Tags that no longer exist in the registry never match.
    pub async fn query(&self, query: &Query) -> Result<Page> {
        let known = self.inner.tags.ids().await;
        self.inner.catalog.query_known(query, &known).await.or_catalog()
    }

    pub async fn get(&self, id: FileId) -> Result<FileRecord> {
        self.inner.catalog.get(id).await.or_catalog()
    }

    /// The `n` (or the configured default) most recently added active files.
    pub async fn recent(&self, n: Option<usize>) -> Vec<FileRecord> {
        self.inner.catalog.list_recent(n.unwrap_or(self.inner.settings.recent_default)).await
    }

    // Uploads

    /// Stores one file: payload first, then its preview, then the record.
    /// A record only ever exists for a durably written payload.
    #[instrument(skip(self, upload), fields(name = %upload.name, bytes = upload.data.len()))]
    pub async fn upload(&self, upload: Upload) -> Result<FileRecord> {
        let Upload { name, data, tags, description } = upload;
        let filename = Path::new(name.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .filter(|n| !n.is_empty())
            .ok_or_raise(|| ErrorKind::Validation("filename must not be empty".to_string()))?;
        let size = data.len() as u64;
        let limit = self.inner.settings.max_upload_size;
        if size > limit {
            exn::bail!(ErrorKind::Validation(format!("file is larger than the {limit} byte limit")));
        }
        let tags = self.inner.tags.retain_known(tags).await;
        let mime = media::detect_mime(&filename, &data);

        let id = self.inner.catalog.reserve_id().await;
        self.inner.payloads.write(&payload_path(id), &data).await.or_raise(|| ErrorKind::StorageIo)?;
        let preview = self.store_preview(id, &mime, data).await;

        let file = NewFile { filename, original_name: name, size, mime, description, tags, preview: preview.clone() };
        match self.inner.catalog.add_file(id, file).await.or_catalog() {
            Ok(record) => {
                info!(id, "uploaded file");
                Ok(record)
            },
            Err(err) => {
                // The identifier stays burnt; only the orphaned blobs go.
                if let Err(cleanup) = delete_blob(&self.inner.payloads, &payload_path(id)).await {
                    warn!(id, error = ?cleanup, "could not remove payload of failed upload");
                }
                if let Some(preview) = preview
                    && let Err(cleanup) = delete_blob(&self.inner.previews, &preview).await
                {
                    warn!(id, error = ?cleanup, "could not remove preview of failed upload");
                }
                Err(err)
            },
        }
    }

    /// Renders and stores a preview for image payloads. Failures are logged
    /// and leave the file without a preview.
    async fn store_preview(&self, id: FileId, mime: &str, data: Vec<u8>) -> Option<PathBuf> {
        if !media::is_previewable(mime) {
            return None;
        }
        let max_dimension = self.inner.settings.preview_max_dimension;
        let bytes = match tokio::task::spawn_blocking(move || media::render_preview(&data, max_dimension)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                warn!(id, error = ?err, "could not render preview");
                return None;
            },
            Err(err) => {
                warn!(id, error = %err, "preview task failed");
                return None;
            },
        };
        let path = preview_path(id);
        if let Err(err) = self.inner.previews.write(&path, &bytes).await {
            warn!(id, error = ?err, "could not store preview");
            return None;
        }
        Some(path)
    }

    /// Uploads every file with bounded concurrency.
    pub async fn upload_many(&self, uploads: Vec<Upload>) -> Vec<Outcome> {
        let items = uploads.into_iter().map(|upload| (upload.name.clone(), upload)).collect();
        run_batch(items, self.inner.settings.concurrency, |upload| async move {
            self.upload(upload).await.map(|_| "uploaded")
        })
        .await
    }

    // Metadata

    pub async fn rename(&self, id: FileId, name: &str) -> Result<FileRecord> {
        self.inner.catalog.rename(id, name).await.or_catalog()
    }

    pub async fn change_description(&self, id: FileId, description: &str) -> Result<FileRecord> {
        self.inner.catalog.change_description(id, description).await.or_catalog()
    }

    /// Replaces a file's tags. Unknown tags are silently dropped.
    pub async fn change_tags(&self, id: FileId, tags: TagSet) -> Result<FileRecord> {
        let tags = self.inner.tags.retain_known(tags).await;
        self.inner.catalog.change_tags(id, tags).await.or_catalog()
    }

    // Lifecycle

    pub async fn trash(&self, id: FileId) -> Result<FileRecord> {
        self.inner.catalog.trash(id).await.or_catalog()
    }

    pub async fn recover(&self, id: FileId) -> Result<FileRecord> {
        self.inner.catalog.recover(id).await.or_catalog()
    }

    /// Deletes a file for good, trashed or not. The record goes first, so a
    /// failed metadata flush leaves the file fully intact; payload and preview
    /// are removed afterwards and any blob that can't be removed is logged as
    /// orphaned.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: FileId) -> Result<FileRecord> {
        let record = self.inner.catalog.remove(id).await.or_catalog()?;
        self.discard_blobs(&record).await;
        info!(id, "deleted file");
        Ok(record)
    }

    async fn discard_blobs(&self, record: &FileRecord) {
        if let Err(err) = delete_blob(&self.inner.payloads, &record.payload_path()).await {
            warn!(id = record.id, error = ?err, "could not delete payload, left orphaned");
        }
        if let Some(preview) = &record.preview
            && let Err(err) = delete_blob(&self.inner.previews, preview).await
        {
            warn!(id = record.id, error = ?err, "could not delete preview, left orphaned");
        }
    }

    fn id_items(ids: &[FileId]) -> Vec<(String, FileId)> {
        let unique: BTreeSet<_> = ids.iter().copied().collect();
        unique.into_iter().map(|id| (id.to_string(), id)).collect()
    }

    pub async fn trash_many(&self, ids: &[FileId]) -> Vec<Outcome> {
        run_batch(Self::id_items(ids), self.inner.settings.concurrency, |id| async move {
            self.trash(id).await.map(|_| "trashed")
        })
        .await
    }

    pub async fn recover_many(&self, ids: &[FileId]) -> Vec<Outcome> {
        run_batch(Self::id_items(ids), self.inner.settings.concurrency, |id| async move {
            self.recover(id).await.map(|_| "recovered")
        })
        .await
    }

    pub async fn delete_many(&self, ids: &[FileId]) -> Vec<Outcome> {
        run_batch(Self::id_items(ids), self.inner.settings.concurrency, |id| async move {
            self.delete(id).await.map(|_| "deleted")
        })
        .await
    }

    /// Deletes every file that has been in the trash longer than the
    /// retention period. Each record is checked again right before it is
    /// removed, so a file recovered mid-pass survives. Failures are logged and
    /// left for the next pass.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        let retention = time::Duration::try_from(self.inner.trash.retention()).unwrap_or(time::Duration::MAX);
        let Some(cutoff) = OffsetDateTime::now_utc().checked_sub(retention) else {
            return SweepReport::default();
        };
        let mut report = SweepReport::default();
        for record in self.inner.catalog.trashed_before(cutoff).await {
            match self.inner.catalog.remove_expired(record.id, cutoff).await {
                Ok(Some(removed)) => {
                    self.discard_blobs(&removed).await;
                    report.deleted.push(removed.id);
                },
                Ok(None) => debug!(id = record.id, "no longer expired, skipping"),
                Err(err) => {
                    warn!(id = record.id, error = ?err, "could not delete expired file");
                    report.failed.push(record.id);
                },
            }
        }
        report
    }

    // Tags

    pub async fn tags(&self) -> Vec<Tag> {
        self.inner.tags.all().await
    }

    pub async fn add_tag(&self, name: &str, color: Option<&str>) -> Result<Tag> {
        self.inner.tags.add(name, color).await.or_catalog()
    }

    pub async fn change_tag(&self, id: TagId, name: Option<&str>, color: Option<&str>) -> Result<Tag> {
        self.inner.tags.change(id, name, color).await.or_catalog()
    }

    /// Deletes a tag and strips it from every file. Returns whether the tag
    /// existed.
    #[instrument(skip(self))]
    pub async fn remove_tag(&self, id: TagId) -> Result<bool> {
        let removed = self.inner.tags.remove(id).await.or_catalog()?;
        if removed {
            let files = self.remove_tag_from_all(id).await;
            info!(tag = id, files, "removed tag");
        }
        Ok(removed)
    }

    /// Strips a tag from every file; returns the number of files changed.
    pub async fn remove_tag_from_all(&self, id: TagId) -> usize {
        self.inner.catalog.remove_tag_from_all(id).await
    }

    // Payloads

    /// The (decrypted) payload of a file.
    pub async fn read_payload(&self, id: FileId) -> Result<Vec<u8>> {
        let record = self.get(id).await?;
        self.inner.payloads.read(&record.payload_path()).await.or_raise(|| ErrorKind::StorageIo)
    }

    /// The (decrypted) preview of a file, if it has one.
    pub async fn read_preview(&self, id: FileId) -> Result<Option<Vec<u8>>> {
        let record = self.get(id).await?;
        let Some(preview) = record.preview else {
            return Ok(None);
        };
        let bytes = self.inner.previews.read(&preview).await.or_raise(|| ErrorKind::StorageIo)?;
        Ok(Some(bytes))
    }

    /// Packs the payloads of `ids` into one archive. Unknown identifiers are
    /// skipped; duplicate names get the file identifier as prefix.
    #[instrument(skip(self, ids), fields(files = ids.len()))]
    pub async fn archive(&self, ids: &[FileId], format: ArchiveFormat) -> Result<Vec<u8>> {
        let mut records = Vec::new();
        for (_, id) in Self::id_items(ids) {
            match self.inner.catalog.get(id).await {
                Ok(record) => records.push(record),
                Err(_) => debug!(id, "skipping unknown file"),
            }
        }
        let names = archive::entry_names(&records);
        let mut entries = Vec::with_capacity(records.len());
        for (record, name) in records.into_iter().zip(names) {
            let data = self.inner.payloads.read(&record.payload_path()).await.or_raise(|| ErrorKind::StorageIo)?;
            entries.push(Entry { name, modified: record.created_at.unix_timestamp(), data });
        }
        tokio::task::spawn_blocking(move || archive::build(format, entries))
            .await
            .or_raise(|| ErrorKind::Internal("archive task failed".to_string()))?
    }
}
