//! Zip and tar.gz containers of stored payloads.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;
use std::str::FromStr;
use tagd_catalog::FileRecord;
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    #[default]
    #[display("zip")]
    Zip,
    #[display("tar.gz")]
    TarGz,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = ErrorKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tar.gz" | "tgz" | "targz" => Ok(Self::TarGz),
            other => Err(ErrorKind::Validation(format!("unsupported archive format `{other}`"))),
        }
    }
}

/// One file going into an archive.
pub(crate) struct Entry {
    pub name: String,
    pub modified: i64,
    pub data: Vec<u8>,
}

/// Base name only, so an entry can never escape the extraction directory.
fn sanitize(filename: &str, fallback: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

/// Picks unique entry names for `records`, prefixing the identifier to every
/// name that is already taken.
pub(crate) fn entry_names(records: &[FileRecord]) -> Vec<String> {
    let mut taken = HashSet::new();
    records
        .iter()
        .map(|record| {
            let name = sanitize(&record.filename, &record.id.to_string());
            let name = match taken.contains(&name) {
                true => format!("{}-{name}", record.id),
                false => name,
            };
            taken.insert(name.clone());
            name
        })
        .collect()
}

pub(crate) fn build(format: ArchiveFormat, entries: Vec<Entry>) -> Result<Vec<u8>> {
    match format {
        ArchiveFormat::Zip => build_zip(entries),
        ArchiveFormat::TarGz => build_tar_gz(entries),
    }
}

fn build_zip(entries: Vec<Entry>) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated).unix_permissions(0o644);
    for entry in entries {
        zip.start_file(entry.name.as_str(), options).or_raise(|| ErrorKind::Archive)?;
        zip.write_all(&entry.data).or_raise(|| ErrorKind::Archive)?;
    }
    Ok(zip.finish().or_raise(|| ErrorKind::Archive)?.into_inner())
}

fn build_tar_gz(entries: Vec<Entry>) -> Result<Vec<u8>> {
    let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(entry.data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(u64::try_from(entry.modified).unwrap_or(0));
        header.set_cksum();
        tar.append_data(&mut header, &entry.name, entry.data.as_slice()).or_raise(|| ErrorKind::Archive)?;
    }
    let encoder = tar.into_inner().or_raise(|| ErrorKind::Archive)?;
    encoder.finish().or_raise(|| ErrorKind::Archive)
}
