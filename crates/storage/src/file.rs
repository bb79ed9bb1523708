//! File records returned by storage backends.
//!
//! Records are produced fresh for every call and describe what the backend
//! reported at that moment; nothing here is cached.

use crate::path::{base_name, to_key};
use serde::Serialize;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Metadata describing a stored object or a directory grouping.
///
/// Serializes with camelCase keys and RFC 3339 timestamps; `contentType` is
/// omitted when unknown and `isDirectory` is omitted for plain files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Last component of `path`
    pub name: String,
    /// Normalized logical path relative to the storage root
    pub path: PathBuf,
    /// Size in bytes (zero for directories)
    pub size: u64,
    /// Backend-reported modification time. For object-store uploads and
    /// synthesized directories this is the time the record was built.
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    /// Locator a client can use to fetch the object
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_directory: bool,
}
impl FileInfo {
    /// Create a record for a regular file. The URL defaults to the logical
    /// key until a backend supplies its own with [`with_url`](Self::with_url).
    pub fn new(path: impl Into<PathBuf>, size: u64, last_modified: OffsetDateTime) -> Self {
        let path = path.into();
        Self {
            name: base_name(&path),
            url: to_key(&path),
            path,
            size,
            last_modified,
            content_type: None,
            is_directory: false,
        }
    }

    /// Create a record for a directory grouping.
    pub fn directory(path: impl Into<PathBuf>, last_modified: OffsetDateTime) -> Self {
        Self { is_directory: true, ..Self::new(path, 0, last_modified) }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Logical key of this record (forward slashes on every platform).
    pub fn key(&self) -> String {
        to_key(&self.path)
    }
}
