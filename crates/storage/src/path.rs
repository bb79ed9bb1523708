//! Path validation and security utilities.
//!
//! This module provides functions to validate storage paths and prevent
//! security issues like path traversal attacks. There are two flavours:
//!
//! - [`validate`] / [`validate_dir`] **reject** anything that would leave the
//!   storage root. Backends call these on every path they touch.
//! - [`sanitize`] **neutralizes** instead: escaping segments are dropped so
//!   the result is always confined to the root. The
//!   [`Provider`](crate::Provider) applies it to caller input before
//!   forwarding.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Characters replaced in user-supplied filenames.
const UNSAFE_FILENAME_CHARS: [char; 10] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '%'];

fn has_nul(segment: &OsStr) -> bool {
    segment.as_encoded_bytes().contains(&0)
}

/// Shared component folding for [`validate`] and [`validate_dir`]. An empty
/// result is permitted here; callers decide whether it means "root".
fn normalize(path: &Path) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls — reject them explicitly.
                if has_nul(s) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    Ok(components.into_iter().collect())
}

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use filekit_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("uploads/report.pdf").is_ok());
/// assert!(validate_path("a/b/c/file.txt").is_ok());
/// assert!(validate_path("a/../file.txt").is_ok()); // (never leaves storage root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves storage root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./path.txt/").unwrap(),
///     Path::new("correct/path.txt")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let normalized = normalize(path.as_ref())?;
    match normalized.as_os_str().is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(normalized),
    }
}

/// Validates a directory path for listing.
///
/// Identical to [`validate`] except that a path normalizing to nothing (`""`,
/// `"/"`, `"."`) is accepted and returned as the empty path, meaning the
/// storage root.
pub fn validate_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    normalize(path.as_ref())
}

/// Neutralizes a caller-supplied path so that it can never resolve outside
/// the storage root.
///
/// Unlike [`validate`] this never fails: root and prefix components are
/// dropped, `..` segments that would climb above the root are discarded and
/// segments containing null bytes are removed entirely.
///
/// ```
/// use std::path::Path;
/// use filekit_storage::path::sanitize;
/// assert_eq!(sanitize("/etc/passwd"), Path::new("etc/passwd"));
/// assert_eq!(sanitize("../../secret.txt"), Path::new("secret.txt"));
/// assert_eq!(sanitize("a/b/../../../c"), Path::new("c"));
/// ```
pub fn sanitize(path: impl AsRef<Path>) -> PathBuf {
    let mut components: Vec<&OsStr> = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) if !has_nul(s) => components.push(s),
            Component::ParentDir => {
                components.pop();
            },
            _ => {},
        }
    }
    components.into_iter().collect()
}

/// Reduces a declared upload filename to a safe base name.
///
/// Only the final path component is kept and characters that are awkward on
/// common filesystems or in URLs are replaced with `_`. Returns `_` when
/// nothing usable remains.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match UNSAFE_FILENAME_CHARS.contains(&c) || c == '\0' {
            true => '_',
            false => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Render a normalized path as a forward-slash key, independent of the
/// platform separator. Used for URLs and object-store keys.
pub fn to_key(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Base name of a logical path (the last component), or an empty string for
/// the root.
pub fn base_name(path: impl AsRef<Path>) -> String {
    path.as_ref().file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}
