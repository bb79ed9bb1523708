//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for storage operations across different backends (local filesystem,
//! S3-compatible services, etc.).
//!

mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::file::FileInfo;
use crate::upload::Upload;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;

pub type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
/// Exclusively owned handle on stored content. Dropping it releases the
/// underlying file descriptor or network connection.
pub type ContentReader = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Join a public base URL and a key with exactly one separating slash.
pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Unified interface for storage backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access. Cancellation is dropping the future;
/// deadlines are applied by the [`Provider`](crate::Provider).
///
/// # Path Handling
/// All paths are logical, relative to the storage root, and validated with
/// [`validate_path`](crate::validate_path) before use. No input may resolve
/// outside the configured root.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tokio::io::AsyncReadExt;
/// use filekit_storage::{backend::StorageBackend, error::Result};
///
/// async fn read_small_file(backend: &dyn StorageBackend) -> Result<Vec<u8>> {
///     let path = Path::new("docs/readme.txt");
///     let mut data = Vec::new();
///     if backend.exists(path).await? {
///         let (mut reader, info) = backend.get(path).await?;
///         data.reserve(info.size as usize);
///         reader.read_to_end(&mut data).await.map_err(filekit_storage::error::ErrorKind::Io)?;
///     }
///     Ok(data)
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend. Used for logging only.
    fn name(&self) -> &str;

    /// Store new content at a logical path.
    ///
    /// Never overwrites: an occupied destination fails with
    /// [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists). The check
    /// is not atomic across concurrent writers.
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use filekit_storage::Upload;
    /// # use filekit_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let upload = Upload::from_bytes("report.pdf", b"%PDF-1.7".to_vec());
    /// let info = backend.upload(upload, Path::new("docs/report.pdf")).await?;
    /// println!("stored at {}", info.url);
    /// # Ok(())
    /// # }
    /// ```
    async fn upload(&self, upload: Upload, path: &Path) -> Result<FileInfo>;

    /// Open stored content for reading, along with its metadata.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing is
    /// stored at the path, [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
    /// if the path is a directory.
    async fn get(&self, path: &Path) -> Result<(ContentReader, FileInfo)>;

    /// Delete a stored file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist, [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
    /// for directories.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Check if something is stored at a path.
    ///
    /// Directories count: on object stores that means a key prefix with
    /// objects below it. Absence is `Ok(false)`, including paths that run
    /// through a plain file; only infrastructure failures are errors.
    ///
    /// ```no_run
    /// use std::path::Path;
    /// # use filekit_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// if backend.exists(Path::new("avatar.png")).await? {
    ///     println!("File exists!");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// List the direct children of a directory.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, dir: &Path) -> Result<Vec<FileInfo>> {
        self.list_stream(dir).try_collect().await
    }

    /// Stream one record per direct child of a directory (the empty path is
    /// the storage root).
    ///
    /// A path naming a plain file yields a single record describing that
    /// file. A path that doesn't exist yields
    /// [`NotFound`](crate::error::ErrorKind::NotFound).
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use filekit_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(Path::new("images"));
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, dir: &'a Path) -> FileInfoStream<'a>;

    /// Get file metadata without transferring content.
    ///
    /// Fails exactly like [`get()`](Self::get).
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
