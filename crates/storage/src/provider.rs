//! Provider facade over a configured backend.

use crate::backend::{ContentReader, LocalBackend};
use crate::config::StorageConfig;
use crate::error::{ErrorKind, Result};
use crate::path::sanitize;
use crate::{BackendHandle, FileInfo, Upload};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Single entry point for application code.
///
/// Caller-supplied paths are sanitized before they reach the backend, so
/// traversal attempts such as `../../etc/passwd` land inside the storage root
/// instead of failing. Backend errors are passed through unchanged, except
/// that an operation outliving the configured deadline fails with
/// [`Timeout`](ErrorKind::Timeout).
///
/// ```
/// use filekit_storage::{Provider, Upload, backend::LocalBackend};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let temp = tempfile::tempdir()?;
/// let backend = LocalBackend::new("uploads", temp.path())?;
/// let provider = Provider::new(Arc::new(backend));
/// provider.upload(Upload::from_bytes("hello.txt", b"hi".to_vec()), Path::new("hello.txt")).await?;
/// assert!(provider.exists(Path::new("hello.txt")).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Provider {
    backend: BackendHandle,
    timeout: Option<Duration>,
}

impl Provider {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend, timeout: None }
    }

    /// Apply a deadline to every operation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the backend named by a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Configuration`](ErrorKind::Configuration) listing every
    /// problem with the configuration, or when it names a backend that was
    /// not compiled in.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            exn::bail!(ErrorKind::Configuration(problems.join("; ")));
        }
        let backend: BackendHandle = match config {
            StorageConfig::Local(local) => Arc::new(LocalBackend::from_config("local", local)?),
            #[cfg(feature = "s3")]
            StorageConfig::S3(s3) => Arc::new(crate::backend::S3Backend::connect("s3", s3).await?),
            #[cfg(not(feature = "s3"))]
            StorageConfig::S3(_) => {
                exn::bail!(ErrorKind::Configuration("S3 support was not compiled in".to_string()))
            },
        };
        tracing::debug!(backend = backend.name(), kind = config.kind(), "storage provider ready");
        Ok(Self::new(backend))
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    async fn deadline<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let Some(limit) = self.timeout else {
            return operation.await;
        };
        match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(backend = self.backend.name(), timeout = ?limit, "storage operation timed out");
                exn::bail!(ErrorKind::Timeout)
            },
        }
    }

    pub async fn upload(&self, upload: Upload, path: &Path) -> Result<FileInfo> {
        let path = sanitize(path);
        let info = self.deadline(self.backend.upload(upload, &path)).await?;
        tracing::info!(backend = self.backend.name(), path = %info.path.display(), bytes = info.size, "file uploaded");
        Ok(info)
    }

    pub async fn get(&self, path: &Path) -> Result<(ContentReader, FileInfo)> {
        let path = sanitize(path);
        self.deadline(self.backend.get(&path)).await
    }

    pub async fn delete(&self, path: &Path) -> Result<()> {
        let path = sanitize(path);
        self.deadline(self.backend.delete(&path)).await?;
        tracing::info!(backend = self.backend.name(), path = %path.display(), "file deleted");
        Ok(())
    }

    pub async fn exists(&self, path: &Path) -> Result<bool> {
        let path = sanitize(path);
        self.deadline(self.backend.exists(&path)).await
    }

    /// List a directory; the empty path is the storage root.
    pub async fn list(&self, dir: &Path) -> Result<Vec<FileInfo>> {
        let dir = sanitize(dir);
        self.deadline(self.backend.list(&dir)).await
    }

    pub async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = sanitize(path);
        self.deadline(self.backend.stat(&path)).await
    }
}
