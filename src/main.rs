//! `tagd`: command-line front end to the tagged file store.
//!
//! Every command opens the store described by the configuration, performs
//! one operation and prints the result as JSON on stdout. Logs go to stderr.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tagd_catalog::{FileId, FileRecord, Page, Query, SortKey, SortMode, SortOrder, TagId, TagSet};
use tagd_config::Config;
use tagd_library::{ArchiveFormat, Engine, Upload};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tagd", version, about = "Self-hosted tagged file store")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON) layered over the defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload one or more files
    Upload {
        files: Vec<PathBuf>,
        /// Tag to attach (repeatable); unknown tags are ignored
        #[arg(long = "tag", short)]
        tags: Vec<TagId>,
        #[arg(long, short, default_value = "")]
        description: String,
    },
    /// Query files by tag expression, search text, sort order and page
    Query {
        /// Tag expression, e.g. "1 & !(2 | 3)"; empty matches everything
        #[arg(default_value = "")]
        expression: String,
        #[arg(long, default_value = "name")]
        sort: SortKey,
        #[arg(long, default_value = "asc")]
        order: SortOrder,
        #[arg(long, short, default_value = "")]
        search: String,
        /// Treat the search text as a regular expression
        #[arg(long)]
        regex: bool,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Page size; 0 returns everything from the offset on
        #[arg(long, default_value_t = 0)]
        count: usize,
        /// Include files in the trash
        #[arg(long)]
        trashed: bool,
    },
    /// Show one file
    Show { id: FileId },
    /// Most recently added files
    Recent { count: Option<usize> },
    Rename { id: FileId, name: String },
    Describe { id: FileId, description: String },
    /// Replace the tags of a file
    Tags { id: FileId, tags: Vec<TagId> },
    /// Move files to the trash
    Trash { ids: Vec<FileId> },
    /// Restore files from the trash
    Recover { ids: Vec<FileId> },
    /// Delete files permanently
    Delete { ids: Vec<FileId> },
    /// Pack payloads into an archive
    Archive {
        ids: Vec<FileId>,
        #[arg(long, short)]
        output: PathBuf,
        /// zip or tar.gz
        #[arg(long, short, default_value = "zip")]
        format: ArchiveFormat,
    },
    /// Delete trashed files whose retention expired
    Sweep,
    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: TagCommand,
    },
}

#[derive(Subcommand)]
enum TagCommand {
    List,
    Add {
        name: String,
        #[arg(long, short)]
        color: Option<String>,
    },
    Change {
        id: TagId,
        #[arg(long, short)]
        name: Option<String>,
        #[arg(long, short)]
        color: Option<String>,
    },
    /// Delete a tag and remove it from every file
    Remove { id: TagId },
}

/// JSON shape of a query result.
#[derive(Serialize)]
struct PageView {
    total: usize,
    offset_out_of_bounds: bool,
    files: Vec<FileRecord>,
}

impl From<Page> for PageView {
    fn from(page: Page) -> Self {
        let total = page.total();
        let offset_out_of_bounds = matches!(page, Page::OffsetOutOfBounds { .. });
        Self { total, offset_out_of_bounds, files: page.into_records() }
    }
}

#[derive(Serialize)]
struct Removed {
    id: TagId,
    removed: bool,
}

#[derive(Serialize)]
struct Written {
    path: PathBuf,
    bytes: usize,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).or_raise(|| ErrorKind::Print)?;
    println!("{out}");
    Ok(())
}

/// Converts an engine result, keeping the engine's caller-safe message.
fn engine<T>(result: tagd_library::error::Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            let message = (*err).to_string();
            Err(err).or_raise(|| ErrorKind::Engine(message))
        },
    }
}

fn init_tracing(config: &Config) {
    let fallback = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();
}

async fn read_uploads(files: Vec<PathBuf>, tags: &TagSet, description: &str) -> Result<Vec<Upload>> {
    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        let data = tokio::fs::read(&path).await.or_raise(|| ErrorKind::ReadInput(path.clone()))?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        uploads.push(Upload { name, data, tags: tags.clone(), description: description.to_string() });
    }
    Ok(uploads)
}

async fn run(engine_handle: &Engine, command: Command) -> Result<()> {
    let e = engine_handle;
    match command {
        Command::Upload { files, tags, description } => {
            let tags: TagSet = tags.into_iter().collect();
            let uploads = read_uploads(files, &tags, &description).await?;
            print_json(&e.upload_many(uploads).await)
        },
        Command::Query { expression, sort, order, search, regex, offset, count, trashed } => {
            let query = Query {
                expression,
                sort: SortMode::new(sort, order),
                search,
                regex,
                offset,
                count,
                include_trashed: trashed,
            };
            print_json(&PageView::from(engine(e.query(&query).await)?))
        },
        Command::Show { id } => print_json(&engine(e.get(id).await)?),
        Command::Recent { count } => print_json(&e.recent(count).await),
        Command::Rename { id, name } => print_json(&engine(e.rename(id, &name).await)?),
        Command::Describe { id, description } => print_json(&engine(e.change_description(id, &description).await)?),
        Command::Tags { id, tags } => print_json(&engine(e.change_tags(id, tags.into_iter().collect()).await)?),
        Command::Trash { ids } => print_json(&e.trash_many(&ids).await),
        Command::Recover { ids } => print_json(&e.recover_many(&ids).await),
        Command::Delete { ids } => print_json(&e.delete_many(&ids).await),
        Command::Archive { ids, output, format } => {
            let bytes = engine(e.archive(&ids, format).await)?;
            tokio::fs::write(&output, &bytes).await.or_raise(|| ErrorKind::WriteOutput(output.clone()))?;
            info!(path = %output.display(), bytes = bytes.len(), "archive written");
            print_json(&Written { path: output, bytes: bytes.len() })
        },
        Command::Sweep => print_json(&e.sweep().await),
        Command::Tag { command } => match command {
            TagCommand::List => print_json(&e.tags().await),
            TagCommand::Add { name, color } => print_json(&engine(e.add_tag(&name, color.as_deref()).await)?),
            TagCommand::Change { id, name, color } => {
                print_json(&engine(e.change_tag(id, name.as_deref(), color.as_deref()).await)?)
            },
            TagCommand::Remove { id } => {
                let removed = engine(e.remove_tag(id).await)?;
                print_json(&Removed { id, removed })
            },
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", *err);
            return ExitCode::FAILURE;
        },
    };
    init_tracing(&config);
    info!(%config, "configuration loaded");

    let store = match Engine::open(&config).await {
        Ok(store) => store,
        Err(err) => {
            debug!(error = ?err, "engine failed to open");
            eprintln!("error: {}", *err);
            return ExitCode::FAILURE;
        },
    };
    let result = run(&store, cli.command).await;
    let closed = engine(store.shutdown().await);

    match result.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!(error = ?err, "command failed");
            eprintln!("error: {}", *err);
            ExitCode::FAILURE
        },
    }
}
