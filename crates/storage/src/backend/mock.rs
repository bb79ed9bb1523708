//! In-memory storage backend for testing.

use super::{ContentReader, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::{validate as validate_path, validate_dir};
use crate::{StorageBackend, Upload, mime};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::RwLock;

type Files = BTreeMap<PathBuf, (OffsetDateTime, Vec<u8>)>;

/// In-memory storage backend for testing.
///
/// Files are stored in a `BTreeMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Directories are
/// implied by key ancestry, as on an object store, but otherwise the
/// semantics follow the local backend. Ideal for unit tests that need a
/// [`StorageBackend`] without filesystem or network dependencies.
///
/// # Examples
///
/// ```
/// use filekit_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("docs/readme.txt", b"hello"),
/// ]);
/// assert!(backend.exists(Path::new("docs/readme.txt")).await?);
/// assert!(backend.exists(Path::new("docs")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<Files>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn file_info(path: &Path, modified: OffsetDateTime, data: &[u8]) -> FileInfo {
        FileInfo::new(path, data.len() as u64, modified).with_content_type(mime::from_path(path))
    }

    /// A directory exists when any stored key lives below it. The root
    /// always exists.
    fn is_directory(files: &Files, path: &Path) -> bool {
        path.as_os_str().is_empty() || files.keys().any(|key| key != path && key.starts_with(path))
    }

    /// Look up a regular file, applying the same failures as the local backend.
    fn lookup<'f>(files: &'f Files, path: &Path) -> Result<&'f (OffsetDateTime, Vec<u8>)> {
        if let Some(entry) = files.get(path) {
            return Ok(entry);
        }
        match Self::is_directory(files, path) {
            true => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            false => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
        }
    }

    fn children(files: &Files, dir: &Path) -> Vec<FileInfo> {
        let mut children: BTreeMap<String, FileInfo> = BTreeMap::new();
        for (key, (modified, data)) in files.range(dir.to_path_buf()..) {
            let Ok(rest) = key.strip_prefix(dir) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            let name = first.as_os_str().to_string_lossy().into_owned();
            let child = dir.join(first);
            let info = match components.next() {
                None => Self::file_info(&child, *modified, data),
                Some(_) => FileInfo::directory(&child, *modified),
            };
            children.entry(name).or_insert(info);
        }
        children.into_values().collect()
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, upload: Upload, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let data = upload.into_bytes().await?;
        let mut guard = self.storage.write().await;
        if guard.contains_key(&path) || Self::is_directory(&guard, &path) {
            exn::bail!(ErrorKind::AlreadyExists(path));
        }
        // A stored file can't also be a directory.
        if let Some(ancestor) = path.ancestors().skip(1).find(|a| guard.contains_key(*a)) {
            exn::bail!(ErrorKind::InvalidPath(ancestor.to_path_buf()));
        }
        let now = OffsetDateTime::now_utc();
        let info = Self::file_info(&path, now, &data);
        guard.insert(path, (now, data));
        Ok(info)
    }

    async fn get(&self, path: &Path) -> Result<(ContentReader, FileInfo)> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (modified, data) = Self::lookup(&guard, &path)?;
        let info = Self::file_info(&path, *modified, data);
        Ok((Box::pin(Cursor::new(data.clone())), info))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.storage.write().await;
        Self::lookup(&guard, &path)?;
        guard.remove(&path);
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        Ok(guard.contains_key(&path) || Self::is_directory(&guard, &path))
    }

    fn list_stream<'a>(&'a self, dir: &'a Path) -> FileInfoStream<'a> {
        let dir = match validate_dir(dir) {
            Ok(dir) => dir,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let listing: Result<Vec<FileInfo>> = {
                let guard = self.storage.read().await;
                match guard.get(&dir) {
                    Some((modified, data)) => Ok(vec![Self::file_info(&dir, *modified, data)]),
                    None if Self::is_directory(&guard, &dir) => Ok(Self::children(&guard, &dir)),
                    None => Err(exn::Exn::from(ErrorKind::NotFound(dir.clone()))),
                }
            };
            match listing {
                Ok(entries) => {
                    for entry in entries {
                        yield Ok(entry);
                    }
                },
                Err(e) => {
                    yield Err(e);
                },
            }
        })
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (modified, data) = Self::lookup(&guard, &path)?;
        Ok(Self::file_info(&path, *modified, data))
    }
}
