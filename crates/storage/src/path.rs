//! Storage path validation.
//!
//! Payloads are addressed by paths relative to a backend root. Those paths
//! are built from file identifiers, but the salt file and previews live next
//! to them, so every backend runs incoming paths through [`validate`] before
//! touching the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Normalizes a relative storage path and rejects anything that would leave
/// the backend root.
///
/// `.` components and repeated or trailing separators are dropped, `..` is
/// resolved as long as it never climbs above the root. Absolute paths are
/// re-rooted, Windows prefixes and NUL bytes are rejected, and a path that
/// normalizes to nothing is invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tagd_storage::validate_path;
///
/// assert_eq!(validate_path("42").unwrap(), Path::new("42"));
/// assert_eq!(validate_path("resized/./42.jpg").unwrap(), Path::new("resized/42.jpg"));
/// assert!(validate_path("../configs/files.json").is_err());
/// assert!(validate_path("4\02").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(segment) => {
                // NUL survives Path::components() on Unix but truncates the
                // path once it reaches a syscall.
                if segment.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(segment);
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(invalid());
    }
    Ok(components.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_paths() {
        assert_eq!(validate("1").unwrap(), Path::new("1"));
        assert_eq!(validate("18446744073709551615").unwrap(), Path::new("18446744073709551615"));
        assert_eq!(validate(".salt").unwrap(), Path::new(".salt"));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(validate("resized//7.jpg").unwrap(), Path::new("resized/7.jpg"));
        assert_eq!(validate("./resized/./7.jpg").unwrap(), Path::new("resized/7.jpg"));
        assert_eq!(validate("resized/").unwrap(), Path::new("resized"));
        assert_eq!(validate("/7").unwrap(), Path::new("7"));
        assert_eq!(validate("resized/../7").unwrap(), Path::new("7"));
    }

    #[test]
    fn test_escaping_root() {
        assert!(validate("..").is_err());
        assert!(validate("../configs/tags.json").is_err());
        assert!(validate("resized/../../7").is_err());
    }

    #[test]
    fn test_degenerate_paths() {
        assert!(validate("").is_err());
        assert!(validate(".").is_err());
        assert!(validate("//").is_err());
        assert!(validate("\0").is_err());
        assert!(validate("1\02").is_err());
    }
}
