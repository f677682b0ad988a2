//! Configuration for tagd.
//!
//! Values are layered with [`figment`], later layers overriding earlier ones:
//!
//! 1. built-in defaults ([`Config::default`]),
//! 2. `config.toml`, `config.yaml` and `config.json` in the platform config
//!    directory (e.g. `~/.config/tagd` on Linux),
//! 3. an explicitly requested file (`--config`),
//! 4. environment variables prefixed with `TAGD_`, using `__` to reach
//!    nested keys: `TAGD_STORAGE__ENCRYPT=true`.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const ENV_PREFIX: &str = "TAGD_";
const CONFIG_FILES: [&str; 3] = ["config.toml", "config.yaml", "config.json"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Verbose logging.
    pub debug: bool,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub trash: TrashConfig,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where file payloads are stored.
    pub data_dir: PathBuf,
    /// Where resized previews are stored.
    pub preview_dir: PathBuf,
    pub files_document: PathBuf,
    pub tags_document: PathBuf,
    /// Encrypt payloads and previews at rest.
    pub encrypt: bool,
    /// Required when `encrypt` is set. Never logged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            preview_dir: PathBuf::from("./data/resized"),
            files_document: PathBuf::from("./configs/files.json"),
            tags_document: PathBuf::from("./configs/tags.json"),
            encrypt: false,
            passphrase: None,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("data_dir", &self.data_dir)
            .field("preview_dir", &self.preview_dir)
            .field("files_document", &self.files_document)
            .field("tags_document", &self.tags_document)
            .field("encrypt", &self.encrypt)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Items of a batch processed at the same time.
    pub concurrency: usize,
    /// Largest accepted upload, in bytes.
    pub max_upload_size: u64,
    /// Records returned by "recent" when the caller doesn't say.
    pub recent_default: usize,
    /// Longest edge of generated previews, in pixels.
    pub preview_max_dimension: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { concurrency: 8, max_upload_size: 50 << 20, recent_default: 5, preview_max_dimension: 256 }
    }
}

/// Trash lifecycle. Both values are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrashConfig {
    /// How long a trashed file is kept before the sweep deletes it.
    pub retention: u64,
    /// How often the sweep runs.
    pub sweep_interval: u64,
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self { retention: 7 * 24 * 60 * 60, sweep_interval: 60 * 60 }
    }
}

impl TrashConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }
}

/// Platform specific directory holding user configuration, if the platform
/// has one.
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "tagd").map(|dirs| dirs.config_dir().to_path_buf())
}

fn file_provider(path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    let figment = Figment::new();
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}

/// Builds the layered figment described in the [crate docs](crate).
pub fn figment(user_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(dir) = user_dir {
        for name in CONFIG_FILES {
            let path = dir.join(name);
            if path.is_file() {
                debug!(path = %path.display(), "merging user config file");
                figment = figment.merge(file_provider(&path)?);
            }
        }
    }
    if let Some(path) = explicit {
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        figment = figment.merge(file_provider(path)?);
    }
    Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
}

impl Config {
    /// Loads configuration from every layer, including the user's platform
    /// config directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(&figment(config_dir().as_deref(), explicit)?)
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| ErrorKind::Invalid(reason.to_string());
        if self.engine.concurrency == 0 {
            exn::bail!(invalid("engine.concurrency must be at least 1"));
        }
        if self.engine.max_upload_size == 0 {
            exn::bail!(invalid("engine.max_upload_size must be at least 1"));
        }
        if self.engine.preview_max_dimension == 0 {
            exn::bail!(invalid("engine.preview_max_dimension must be at least 1"));
        }
        if self.trash.sweep_interval == 0 {
            exn::bail!(invalid("trash.sweep_interval must be at least 1"));
        }
        if self.storage.encrypt && self.storage.passphrase.as_deref().is_none_or(str::is_empty) {
            exn::bail!(invalid("storage.passphrase is required when storage.encrypt is enabled"));
        }
        Ok(())
    }
}

/// Single-line summary for the startup log. The passphrase is masked.
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passphrase = match self.storage.passphrase {
            Some(_) => "***",
            None => "none",
        };
        write!(
            f,
            "debug={} data_dir={} preview_dir={} files_document={} tags_document={} encrypt={} passphrase={} \
             concurrency={} max_upload_size={} recent_default={} preview_max_dimension={} retention={}s \
             sweep_interval={}s",
            self.debug,
            self.storage.data_dir.display(),
            self.storage.preview_dir.display(),
            self.storage.files_document.display(),
            self.storage.tags_document.display(),
            self.storage.encrypt,
            passphrase,
            self.engine.concurrency,
            self.engine.max_upload_size,
            self.engine.recent_default,
            self.engine.preview_max_dimension,
            self.trash.retention,
            self.trash.sweep_interval,
        )
    }
}
