use async_trait::async_trait;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tagd_catalog::error::ErrorKind as CatalogErrorKind;
use tagd_catalog::{Catalog, FileId, Page, Query, TagRegistry, TagSet};
use tagd_config::{Config, EngineConfig, TrashConfig};
use tagd_library::error::ErrorKind;
use tagd_library::{ArchiveFormat, Engine, Parts, Upload};
use tagd_storage::StorageBackend;
use tagd_storage::backend::MockBackend;
use tagd_storage::error::Result as StorageResult;

struct Fixture {
    engine: Engine,
    payloads: Arc<MockBackend>,
    previews: Arc<MockBackend>,
    metadata: Arc<MockBackend>,
}

async fn fixture_with(settings: EngineConfig, trash: TrashConfig) -> Fixture {
    let payloads = Arc::new(MockBackend::default().with_name("payloads"));
    let previews = Arc::new(MockBackend::default().with_name("previews"));
    let metadata = Arc::new(MockBackend::default().with_name("metadata"));
    let catalog = Catalog::open(metadata.clone(), "files.json").await.unwrap();
    let tags = TagRegistry::open(metadata.clone(), "tags.json").await.unwrap();
    let engine = Engine::new(Parts {
        catalog,
        tags,
        payloads: payloads.clone(),
        previews: previews.clone(),
        settings,
        trash,
    });
    Fixture { engine, payloads, previews, metadata }
}

async fn fixture() -> Fixture {
    fixture_with(EngineConfig::default(), TrashConfig::default()).await
}

fn upload(name: &str, data: &[u8], tags: &[u32]) -> Upload {
    Upload { name: name.to_string(), data: data.to_vec(), tags: tags.iter().copied().collect(), ..Upload::default() }
}

fn png() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(512, 128, image::Rgba([0, 128, 255, 255]));
    let mut encoded = Cursor::new(Vec::new());
    image.write_to(&mut encoded, image::ImageFormat::Png).unwrap();
    encoded.into_inner()
}

/// Tags {1: red, 2: blue}; A{1}, B{2}, C{1,2}.
async fn red_blue() -> Fixture {
    let fixture = fixture().await;
    fixture.engine.add_tag("red", Some("#ff0000")).await.unwrap();
    fixture.engine.add_tag("blue", Some("#0000ff")).await.unwrap();
    for (name, tags) in [("A", &[1][..]), ("B", &[2][..]), ("C", &[1, 2][..])] {
        fixture.engine.upload(upload(name, name.as_bytes(), tags)).await.unwrap();
    }
    fixture
}

fn names(page: &Page) -> Vec<&str> {
    page.records().iter().map(|r| r.filename.as_str()).collect()
}

#[tokio::test]
async fn test_upload_stores_payload_and_record() {
    let fixture = fixture().await;
    let record = fixture.engine.upload(upload("docs/notes.txt", b"hello", &[])).await.unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.filename, "notes.txt");
    assert_eq!(record.original_name, "docs/notes.txt");
    assert_eq!(record.size, 5);
    assert_eq!(record.mime, "text/plain");
    assert_eq!(record.preview, None);
    assert_eq!(fixture.payloads.raw("1").await.unwrap(), b"hello");
    assert_eq!(fixture.engine.read_payload(1).await.unwrap(), b"hello");
    assert!(fixture.metadata.raw("files.json").await.is_some());
}

#[tokio::test]
async fn test_upload_drops_unknown_tags() {
    let fixture = fixture().await;
    let red = fixture.engine.add_tag("red", None).await.unwrap();
    let record = fixture.engine.upload(upload("a.txt", b"a", &[red.id, 42])).await.unwrap();
    assert_eq!(record.tags, TagSet::from([red.id]));
    let record = fixture.engine.change_tags(record.id, TagSet::from([7, red.id])).await.unwrap();
    assert_eq!(record.tags, TagSet::from([red.id]));
}

#[tokio::test]
async fn test_upload_validation() {
    let settings = EngineConfig { max_upload_size: 4, ..EngineConfig::default() };
    let fixture = fixture_with(settings, TrashConfig::default()).await;
    let err = fixture.engine.upload(upload("big.bin", b"12345", &[])).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Validation(_)));
    let err = fixture.engine.upload(upload("   ", b"1", &[])).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Validation(_)));
    assert!(fixture.payloads.is_empty().await);
}

#[tokio::test]
async fn test_image_upload_gets_preview() {
    let fixture = fixture().await;
    let record = fixture.engine.upload(upload("photo.png", &png(), &[])).await.unwrap();
    assert_eq!(record.mime, "image/png");
    assert_eq!(record.preview.as_deref(), Some(std::path::Path::new("1.jpg")));
    let preview = fixture.engine.read_preview(1).await.unwrap().unwrap();
    let decoded = image::load_from_memory(&preview).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (256, 64));
    assert!(fixture.previews.raw("1.jpg").await.is_some());
}

#[tokio::test]
async fn test_broken_image_still_uploads() {
    let fixture = fixture().await;
    let record = fixture.engine.upload(upload("broken.png", b"not really a png", &[])).await.unwrap();
    assert_eq!(record.preview, None);
    assert_eq!(fixture.engine.read_preview(record.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_record_flush_removes_payload() {
    let fixture = fixture().await;
    fixture.metadata.fail_writes(true);
    let err = fixture.engine.upload(upload("a.txt", b"a", &[])).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Catalog(CatalogErrorKind::StorageIo));
    assert!(fixture.payloads.is_empty().await);
    fixture.metadata.fail_writes(false);
    // Identifier 1 was burnt by the failed upload.
    assert_eq!(fixture.engine.upload(upload("a.txt", b"a", &[])).await.unwrap().id, 2);
}

#[tokio::test]
async fn test_failed_payload_write_creates_no_record() {
    let fixture = fixture().await;
    fixture.payloads.fail_writes(true);
    let err = fixture.engine.upload(upload("a.txt", b"a", &[])).await.unwrap_err();
    assert_eq!(*err, ErrorKind::StorageIo);
    assert!(fixture.engine.catalog().is_empty().await);
}

#[tokio::test]
async fn test_query_scenario() {
    let fixture = red_blue().await;
    let query = |expression: &str| Query { expression: expression.to_string(), ..Query::default() };
    assert_eq!(names(&fixture.engine.query(&query("1&2")).await.unwrap()), vec!["C"]);
    assert_eq!(names(&fixture.engine.query(&query("1|2")).await.unwrap()), vec!["A", "B", "C"]);
    assert_eq!(names(&fixture.engine.query(&query("!1")).await.unwrap()), vec!["B"]);
    let err = fixture.engine.query(&query("1 &")).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Catalog(CatalogErrorKind::BadExpressionSyntax { .. })));
}

#[tokio::test]
async fn test_removing_tag_cascades() {
    let fixture = red_blue().await;
    assert!(fixture.engine.remove_tag(2).await.unwrap());
    assert!(!fixture.engine.remove_tag(2).await.unwrap());
    assert_eq!(fixture.engine.get(3).await.unwrap().tags, TagSet::from([1]));
    assert_eq!(fixture.engine.get(2).await.unwrap().tags, TagSet::new());
    assert_eq!(fixture.engine.tags().await.len(), 1);
}

#[tokio::test]
async fn test_batch_lifecycle() {
    let fixture = red_blue().await;
    let outcomes = fixture.engine.trash_many(&[1, 2, 99]).await;
    assert_eq!(outcomes.len(), 3);
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "99");
    assert_eq!(failed[0].message, "file 99 not found");
    assert!(outcomes.iter().filter(|o| o.success).all(|o| o.message == "trashed"));
    assert_eq!(names(&fixture.engine.query(&Query::default()).await.unwrap()), vec!["C"]);

    let outcomes = fixture.engine.recover_many(&[1]).await;
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].message, "recovered");

    let outcomes = fixture.engine.delete_many(&[2, 3, 3]).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.success && o.message == "deleted"));
    assert!(fixture.engine.get(2).await.unwrap_err().is_not_found());
    assert_eq!(fixture.payloads.len().await, 1);
}

#[tokio::test]
async fn test_delete_tolerates_missing_payload() {
    let fixture = red_blue().await;
    fixture.payloads.delete(std::path::Path::new("1")).await.unwrap();
    fixture.engine.delete(1).await.unwrap();
    assert!(fixture.engine.get(1).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_survives_payload_failure() {
    let fixture = red_blue().await;
    fixture.payloads.fail_writes(true);
    fixture.engine.delete(1).await.unwrap();
    assert!(fixture.engine.get(1).await.unwrap_err().is_not_found());
    // Left behind as an orphan rather than blocking the delete.
    assert!(fixture.payloads.raw("1").await.is_some());
}

#[tokio::test]
async fn test_failed_metadata_flush_keeps_deleted_file_intact() {
    let fixture = fixture().await;
    fixture.engine.upload(upload("a.txt", b"payload", &[])).await.unwrap();
    fixture.metadata.fail_writes(true);
    let err = fixture.engine.delete(1).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Catalog(CatalogErrorKind::StorageIo));
    fixture.metadata.fail_writes(false);

    assert_eq!(fixture.engine.get(1).await.unwrap().filename, "a.txt");
    assert_eq!(fixture.engine.read_payload(1).await.unwrap(), b"payload");
}

#[tokio::test]
async fn test_sweep_respects_retention() {
    let keep_forever = TrashConfig { retention: u64::MAX, ..TrashConfig::default() };
    let fixture = fixture_with(EngineConfig::default(), keep_forever).await;
    fixture.engine.upload(upload("a.txt", b"a", &[])).await.unwrap();
    fixture.engine.trash(1).await.unwrap();
    assert!(fixture.engine.sweep().await.deleted.is_empty());

    let immediate = TrashConfig { retention: 0, ..TrashConfig::default() };
    let fixture = fixture_with(EngineConfig::default(), immediate).await;
    fixture.engine.upload(upload("a.txt", b"a", &[])).await.unwrap();
    fixture.engine.upload(upload("b.txt", b"b", &[])).await.unwrap();
    fixture.engine.trash(1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = fixture.engine.sweep().await;
    assert_eq!(report.deleted, vec![1]);
    assert!(report.failed.is_empty());
    assert!(fixture.engine.get(2).await.is_ok());
    assert!(fixture.payloads.raw("1").await.is_none());
}

#[tokio::test]
async fn test_sweep_failures_are_retried() {
    let immediate = TrashConfig { retention: 0, ..TrashConfig::default() };
    let fixture = fixture_with(EngineConfig::default(), immediate).await;
    fixture.engine.upload(upload("a.txt", b"a", &[])).await.unwrap();
    fixture.engine.trash(1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    fixture.metadata.fail_writes(true);
    let report = fixture.engine.sweep().await;
    assert_eq!(report.failed, vec![1]);
    assert_eq!(fixture.engine.read_payload(1).await.unwrap(), b"a");
    fixture.metadata.fail_writes(false);
    assert_eq!(fixture.engine.sweep().await.deleted, vec![1]);
}

/// Payload backend that recovers another file while a payload is deleted.
struct RecoverOnDelete {
    inner: MockBackend,
    engine: OnceLock<Engine>,
    recover: FileId,
}

#[async_trait]
impl StorageBackend for RecoverOnDelete {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn exists(&self, path: &Path) -> StorageResult<bool> {
        self.inner.exists(path).await
    }

    async fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.inner.write(path, data).await
    }

    async fn delete(&self, path: &Path) -> StorageResult<()> {
        if let Some(engine) = self.engine.get() {
            engine.recover(self.recover).await.unwrap();
        }
        self.inner.delete(path).await
    }
}

#[tokio::test]
async fn test_sweep_spares_file_recovered_mid_pass() {
    let payloads = Arc::new(RecoverOnDelete { inner: MockBackend::default(), engine: OnceLock::new(), recover: 2 });
    let metadata = Arc::new(MockBackend::default());
    let engine = Engine::new(Parts {
        catalog: Catalog::open(metadata.clone(), "files.json").await.unwrap(),
        tags: TagRegistry::open(metadata, "tags.json").await.unwrap(),
        payloads: payloads.clone(),
        previews: Arc::new(MockBackend::default()),
        settings: EngineConfig::default(),
        trash: TrashConfig { retention: 0, ..TrashConfig::default() },
    });
    engine.upload(upload("a.txt", b"a", &[])).await.unwrap();
    engine.upload(upload("b.txt", b"b", &[])).await.unwrap();
    engine.trash(1).await.unwrap();
    engine.trash(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(payloads.engine.set(engine.clone()).is_ok());

    let report = engine.sweep().await;
    assert_eq!(report.deleted, vec![1]);
    assert!(report.failed.is_empty());
    let survivor = engine.get(2).await.unwrap();
    assert!(!survivor.is_trashed());
    assert_eq!(engine.read_payload(2).await.unwrap(), b"b");
}

#[tokio::test(start_paused = true)]
async fn test_background_sweep_runs_on_interval() {
    let trash = TrashConfig { retention: 0, sweep_interval: 60 };
    let fixture = fixture_with(EngineConfig::default(), trash).await;
    fixture.engine.upload(upload("a.txt", b"a", &[])).await.unwrap();
    fixture.engine.upload(upload("b.txt", b"b", &[])).await.unwrap();
    fixture.engine.start_sweeper().await;
    // Let the immediate first tick pass with nothing to do.
    tokio::task::yield_now().await;

    fixture.engine.trash(1).await.unwrap();
    std::thread::sleep(Duration::from_millis(2));
    fixture.metadata.fail_writes(true);
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(fixture.engine.get(1).await.is_ok(), "flush failure keeps the file");

    // The loop survived the failed pass and retries on the next tick.
    fixture.metadata.fail_writes(false);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(fixture.engine.get(1).await.unwrap_err().is_not_found());
    assert!(fixture.payloads.raw("1").await.is_none());

    fixture.engine.shutdown().await.unwrap();
    fixture.engine.trash(2).await.unwrap();
    std::thread::sleep(Duration::from_millis(2));
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(fixture.engine.get(2).await.unwrap().is_trashed(), "stopped sweep must not run");
}

#[tokio::test]
async fn test_archive_skips_unknown_ids() {
    let fixture = red_blue().await;
    fixture.engine.rename(2, "A").await.unwrap();
    let bytes = fixture.engine.archive(&[1, 2, 404], ArchiveFormat::Zip).await.unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["2-A", "A"]);
    let mut contents = String::new();
    archive.by_name("2-A").unwrap().read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "B");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_get_unique_ids() {
    let fixture = fixture().await;
    let uploads: Vec<_> = (0..40).map(|i| upload(&format!("f{i:02}.txt"), b"x", &[])).collect();
    let outcomes = fixture.engine.upload_many(uploads).await;
    assert_eq!(outcomes.len(), 40);
    assert!(outcomes.iter().all(|o| o.success && o.message == "uploaded"));
    let page = fixture.engine.query(&Query::default()).await.unwrap();
    let mut ids: Vec<_> = page.records().iter().map(|r| r.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 40);
}

#[tokio::test]
async fn test_outcomes_serialize() {
    let fixture = red_blue().await;
    let outcomes = fixture.engine.trash_many(&[1]).await;
    let json = serde_json::to_value(&outcomes).unwrap();
    assert_eq!(json, serde_json::json!([{ "name": "1", "success": true, "message": "trashed" }]));
}

#[tokio::test]
async fn test_open_encrypted_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.storage.preview_dir = dir.path().join("data/resized");
    config.storage.files_document = dir.path().join("configs/files.json");
    config.storage.tags_document = dir.path().join("configs/tags.json");
    config.storage.encrypt = true;
    config.storage.passphrase = Some("correct horse".to_string());

    let engine = Engine::open(&config).await.unwrap();
    let tag = engine.add_tag("work", None).await.unwrap();
    engine.upload(upload("plan.txt", b"top secret plan", &[tag.id])).await.unwrap();
    engine.shutdown().await.unwrap();

    let on_disk = std::fs::read(dir.path().join("data/1")).unwrap();
    assert_ne!(on_disk, b"top secret plan");
    let metadata = std::fs::read_to_string(dir.path().join("configs/files.json")).unwrap();
    assert!(metadata.contains("plan.txt"));

    let engine = Engine::open(&config).await.unwrap();
    assert_eq!(engine.read_payload(1).await.unwrap(), b"top secret plan");
    assert_eq!(engine.get(1).await.unwrap().tags, TagSet::from([tag.id]));
    engine.shutdown().await.unwrap();

    config.storage.passphrase = Some("wrong".to_string());
    let engine = Engine::open(&config).await.unwrap();
    let err = engine.read_payload(1).await.unwrap_err();
    assert_eq!(*err, ErrorKind::StorageIo);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_open_rejects_encryption_without_passphrase() {
    let mut config = Config::default();
    config.storage.encrypt = true;
    let err = Engine::open(&config).await.err().unwrap();
    assert_eq!(*err, ErrorKind::Open);
}
