//! Local filesystem storage backend.
//!
//! This module provides a storage backend implementation for the local filesystem.
//! Files are stored verbatim under a configured directory (no sidecar metadata)
//! and accessed using standard filesystem operations via `tokio::fs` for async I/O.

use crate::backend::{ContentReader, FileInfoStream, join_url};
use crate::config::LocalConfig;
use crate::error::ErrorKind;
use crate::path::{to_key, validate_dir};
use crate::{FileInfo, StorageBackend, Upload, error::Result, mime, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Local filesystem storage backend.
///
/// Stores files in a directory on the local filesystem. All paths are relative
/// to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use filekit_storage::backend::LocalBackend;
///
/// # fn example() -> filekit_storage::error::Result<()> {
/// let backend = LocalBackend::new("local", "./storage/uploads")?
///     .with_base_url(Some("https://cdn.example.com/uploads".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    /// Absolute, canonical root directory
    root: PathBuf,
    base_url: Option<String>,
    create_directories: bool,
}
impl LocalBackend {
    /// Create a new local filesystem backend, creating the root directory if
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Configuration`](ErrorKind::Configuration) if the root is
    /// empty, is not a directory, or cannot be created.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Configuration("local storage root must not be empty".to_string()));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::Configuration(format!(
                    "local storage root `{}` is not a directory",
                    root.display()
                )));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(root).or_raise(|| {
                ErrorKind::Configuration(format!("cannot create local storage root `{}`", root.display()))
            })?;
            tracing::info!(root = %root.display(), "created local storage root");
        }
        let root = root.canonicalize().or_raise(|| {
            ErrorKind::Configuration(format!("cannot resolve local storage root `{}`", root.display()))
        })?;
        Ok(Self {
            name: name.into(),
            root,
            base_url: None,
            create_directories: true,
        })
    }

    /// Build a backend from its configuration section.
    pub fn from_config(name: impl Into<String>, config: &LocalConfig) -> Result<Self> {
        Ok(Self::new(name, &config.root)?
            .with_base_url(config.base_url.clone())
            .with_create_directories(config.create_directories))
    }

    /// Public URL prefix for stored files. Without one, records carry the
    /// logical key as their URL.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url.filter(|url| !url.trim().is_empty());
        self
    }

    /// Whether uploads may create missing parent directories.
    pub fn with_create_directories(mut self, create_directories: bool) -> Self {
        self.create_directories = create_directories;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the absolute path for a relative storage path.
    ///
    /// Validates the path and joins it with the root directory. Returns the
    /// normalized logical path alongside.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<(PathBuf, PathBuf)> {
        let validated = validate_path(path.as_ref())?;
        let absolute = self.root.join(&validated);
        Ok((validated, absolute))
    }

    fn url(&self, logical: &Path) -> String {
        let key = to_key(logical);
        match &self.base_url {
            Some(base) => join_url(base, &key),
            None => key,
        }
    }

    /// Re-use same data collection from file metadata for get, list and stat.
    fn file_info(&self, logical: &Path, metadata: &Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
        let info = match metadata.is_dir() {
            true => FileInfo::directory(logical, modified),
            false => FileInfo::new(logical, metadata.len(), modified).with_content_type(mime::from_path(logical)),
        };
        Ok(info.with_url(self.url(logical)))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists(path.to_path_buf()),
            std::io::ErrorKind::NotADirectory | std::io::ErrorKind::IsADirectory => {
                ErrorKind::InvalidPath(path.to_path_buf())
            },
            _ => ErrorKind::Io(e),
        }
    }

    /// Metadata of an existing regular file; directories are rejected.
    async fn file_metadata(&self, logical: &Path, absolute: &Path) -> Result<Metadata> {
        let metadata = fs::metadata(absolute).await.map_err(|e| Self::map_io_error(e, logical))?;
        if metadata.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(logical.to_path_buf()));
        }
        Ok(metadata)
    }

    async fn ensure_parent(&self, logical: &Path, absolute: &Path) -> Result<()> {
        let Some(parent) = absolute.parent() else {
            return Ok(());
        };
        let logical_parent = logical.parent().unwrap_or(Path::new("")).to_path_buf();
        // A stored file can't also be a directory.
        let mut ancestors: Vec<&Path> = logical_parent.ancestors().filter(|a| !a.as_os_str().is_empty()).collect();
        ancestors.reverse();
        for ancestor in ancestors {
            match fs::metadata(self.root.join(ancestor)).await {
                Ok(metadata) if metadata.is_dir() => continue,
                Ok(_) => exn::bail!(ErrorKind::InvalidPath(ancestor.to_path_buf())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => return Err(Self::map_io_error(e, ancestor).into()),
            }
        }
        if self.create_directories {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, &logical_parent))?;
            return Ok(());
        }
        match fs::metadata(parent).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => exn::bail!(ErrorKind::InvalidPath(logical_parent)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => exn::bail!(ErrorKind::InvalidPath(logical_parent)),
            Err(e) => Err(Self::map_io_error(e, &logical_parent).into()),
        }
    }

    /// Stat a directory entry, following symlinks. Errors are reported to
    /// the caller which skips the entry.
    async fn process_entry(&self, entry: DirEntry, dir: &Path) -> Result<FileInfo> {
        let logical = dir.join(entry.file_name());
        let metadata = fs::metadata(entry.path()).await.map_err(|e| Self::map_io_error(e, &logical))?;
        self.file_info(&logical, &metadata)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, upload: Upload, path: &Path) -> Result<FileInfo> {
        let (logical, absolute) = self.absolute_path(path)?;
        self.ensure_parent(&logical, &absolute).await?;
        if fs::try_exists(&absolute).await.map_err(|e| Self::map_io_error(e, &logical))? {
            exn::bail!(ErrorKind::AlreadyExists(logical));
        }
        // `create_new` closes the gap between the check above and the write
        // for racing writers on the same machine.
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&absolute)
            .await
            .map_err(|e| Self::map_io_error(e, &logical))?;

        let filename = upload.filename().to_string();
        let mut reader = upload.into_reader();
        let copied = match tokio::io::copy(&mut reader, &mut file).await {
            Ok(bytes) => file.flush().await.map(|()| bytes),
            Err(e) => Err(e),
        };
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&absolute).await {
                    tracing::warn!(path = %logical.display(), error = %cleanup, "failed to remove partial upload");
                }
                exn::bail!(ErrorKind::Io(e));
            },
        };

        let metadata = file.metadata().await.map_err(ErrorKind::Io)?;
        tracing::debug!(
            backend = %self.name,
            path = %logical.display(),
            filename = %filename,
            bytes,
            "stored upload"
        );
        self.file_info(&logical, &metadata)
    }

    async fn get(&self, path: &Path) -> Result<(ContentReader, FileInfo)> {
        let (logical, absolute) = self.absolute_path(path)?;
        let metadata = self.file_metadata(&logical, &absolute).await?;
        let file = fs::File::open(&absolute).await.map_err(|e| Self::map_io_error(e, &logical))?;
        let info = self.file_info(&logical, &metadata)?;
        Ok((Box::pin(file), info))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let (logical, absolute) = self.absolute_path(path)?;
        self.file_metadata(&logical, &absolute).await?;
        fs::remove_file(&absolute).await.map_err(|e| Self::map_io_error(e, &logical))?;
        tracing::debug!(backend = %self.name, path = %logical.display(), "deleted file");
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let (logical, absolute) = self.absolute_path(path)?;
        match fs::try_exists(&absolute).await {
            Ok(exists) => Ok(exists),
            // Runs through a plain file, so nothing can be stored there.
            Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => Ok(false),
            Err(e) => Err(Self::map_io_error(e, &logical).into()),
        }
    }

    fn list_stream<'a>(&'a self, dir: &'a Path) -> FileInfoStream<'a> {
        let logical = match validate_dir(dir) {
            Ok(dir) => dir,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        let absolute = self.root.join(&logical);

        Box::pin(stream! {
            let metadata = match fs::metadata(&absolute).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    yield Err(exn::Exn::from(Self::map_io_error(e, &logical)));
                    return;
                }
            };
            // Listing a plain file describes that file alone.
            if !metadata.is_dir() {
                yield self.file_info(&logical, &metadata);
                return;
            }

            let mut entries = match fs::read_dir(&absolute).await {
                Ok(entries) => entries,
                Err(e) => {
                    yield Err(exn::Exn::from(Self::map_io_error(e, &logical)));
                    return;
                }
            };
            let mut children = Vec::new();
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(exn::Exn::from(Self::map_io_error(e, &logical)));
                        return;
                    }
                };
                match self.process_entry(entry, &logical).await {
                    Ok(info) => children.push(info),
                    // Note: most likely a broken symlink or a race with a delete.
                    Err(e) => {
                        let kind: &ErrorKind = &e;
                        tracing::debug!(dir = %logical.display(), error = %kind, "skipping unreadable entry");
                    },
                }
            }
            children.sort_by(|a, b| a.name.cmp(&b.name));
            for child in children {
                yield Ok(child);
            }
        })
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let (logical, absolute) = self.absolute_path(path)?;
        let metadata = self.file_metadata(&logical, &absolute).await?;
        self.file_info(&logical, &metadata)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

    use super::*;
    use rstest::rstest;

    fn backend(dir: &tempfile::TempDir) -> LocalBackend {
        LocalBackend::new("local", dir.path()).unwrap()
    }

    async fn read_all(mut reader: ContentReader) -> Vec<u8> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        data
    }

    /// Yields a few bytes, then fails.
    struct FailingReader {
        sent: bool,
    }
    impl AsyncRead for FailingReader {
        fn poll_read(mut self: Pin<&mut Self>, _: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
            if self.sent {
                return Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")));
            }
            self.sent = true;
            buf.put_slice(b"partial");
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_new_creates_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/uploads");
        let backend = LocalBackend::new("local", &root).unwrap();
        assert!(root.is_dir());
        assert!(backend.root().is_absolute());
    }

    #[test]
    fn test_new_rejects_bad_roots() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, b"data").unwrap();
        let err = LocalBackend::new("local", &file).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration(_)));
        let err = LocalBackend::new("local", "").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration(_)));
    }

    #[test]
    fn test_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        let (logical, absolute) = backend.absolute_path(Path::new("docs/./2024/report.pdf")).unwrap();
        assert_eq!(logical, Path::new("docs/2024/report.pdf"));
        assert_eq!(absolute, backend.root().join("docs/2024/report.pdf"));
        // Path traversal is prevented
        assert!(backend.absolute_path(Path::new("../etc/passwd")).is_err());
    }

    #[tokio::test]
    async fn test_upload_and_get() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        let info = backend
            .upload(Upload::from_bytes("hello.txt", b"Hello, world!".to_vec()), Path::new("greetings/hello.txt"))
            .await
            .unwrap();
        assert_eq!(info.name, "hello.txt");
        assert_eq!(info.size, 13);
        assert_eq!(info.url, "greetings/hello.txt");
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
        assert!(temp_dir.path().join("greetings/hello.txt").is_file());

        let (reader, fetched) = backend.get(Path::new("greetings/hello.txt")).await.unwrap();
        assert_eq!(read_all(reader).await, b"Hello, world!");
        assert_eq!(fetched.size, 13);
        assert_eq!(fetched.name, "hello.txt");
    }

    #[tokio::test]
    async fn test_upload_never_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        let path = Path::new("a.txt");
        backend.upload(Upload::from_bytes("a.txt", b"first".to_vec()), path).await.unwrap();
        let err = backend.upload(Upload::from_bytes("a.txt", b"second".to_vec()), path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(p) if p == path));
        let (reader, _) = backend.get(path).await.unwrap();
        assert_eq!(read_all(reader).await, b"first");
    }

    #[tokio::test]
    async fn test_upload_without_directory_creation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir).with_create_directories(false);
        let err = backend.upload(Upload::from_bytes("a.txt", b"x".to_vec()), Path::new("missing/a.txt")).await;
        assert!(matches!(&*err.unwrap_err(), ErrorKind::InvalidPath(p) if p == Path::new("missing")));
        assert!(!temp_dir.path().join("missing").exists());
        // Root-level uploads always have a parent
        backend.upload(Upload::from_bytes("a.txt", b"x".to_vec()), Path::new("a.txt")).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_removes_partial_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        let upload = Upload::from_reader("big.bin", None, FailingReader { sent: false });
        let err = backend.upload(upload, Path::new("big.bin")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io(_)));
        assert!(!temp_dir.path().join("big.bin").exists());
    }

    #[tokio::test]
    async fn test_upload_rejects_traversal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        let err = backend.upload(Upload::from_bytes("x", b"bad".to_vec()), Path::new("../escape.txt")).await;
        assert!(matches!(&*err.unwrap_err(), ErrorKind::InvalidPath(_)));
        assert!(!temp_dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_base_url() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir).with_base_url(Some("https://cdn.example.com/files/".to_string()));
        let info = backend.upload(Upload::from_bytes("p.png", b"png".to_vec()), Path::new("img/p.png")).await.unwrap();
        assert_eq!(info.url, "https://cdn.example.com/files/img/p.png");
        assert_eq!(info.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_get_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        std::fs::create_dir(temp_dir.path().join("dir")).unwrap();
        let err = backend.get(Path::new("missing.txt")).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = backend.get(Path::new("dir")).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        let err = backend.stat(Path::new("dir")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        assert!(!backend.exists(Path::new("nonexistent.txt")).await.unwrap());
        std::fs::write(temp_dir.path().join("exists.txt"), b"data").unwrap();
        assert!(backend.exists(Path::new("exists.txt")).await.unwrap());
        // Below a plain file is simply absent
        assert!(!backend.exists(Path::new("exists.txt/inner.txt")).await.unwrap());
    }

    #[rstest]
    #[case(true, "a.txt/b.txt", "a.txt")]
    #[case(false, "a.txt/b.txt", "a.txt")]
    #[case(true, "a.txt/nested/b.txt", "a.txt")]
    #[tokio::test]
    async fn test_upload_below_a_file(#[case] create: bool, #[case] path: &str, #[case] blocking: &str) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir).with_create_directories(create);
        std::fs::write(temp_dir.path().join("a.txt"), b"data").unwrap();
        let err = backend.upload(Upload::from_bytes("b.txt", b"x".to_vec()), Path::new(path)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(p) if p == Path::new(blocking)));
        assert!(temp_dir.path().join("a.txt").is_file());
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        std::fs::write(temp_dir.path().join("file.txt"), b"data").unwrap();
        std::fs::create_dir(temp_dir.path().join("dir")).unwrap();
        backend.delete(Path::new("file.txt")).await.unwrap();
        assert!(!backend.exists(Path::new("file.txt")).await.unwrap());
        // Deleting nonexistent file returns error
        let err = backend.delete(Path::new("file.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        // Directories are not deleted
        let err = backend.delete(Path::new("dir")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        assert!(temp_dir.path().join("dir").is_dir());
    }

    #[tokio::test]
    async fn test_list_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        std::fs::create_dir_all(temp_dir.path().join("docs/sub")).unwrap();
        std::fs::write(temp_dir.path().join("docs/b.pdf"), b"pdf").unwrap();
        std::fs::write(temp_dir.path().join("docs/a.txt"), b"hello").unwrap();
        std::fs::write(temp_dir.path().join("docs/sub/deep.txt"), b"not listed").unwrap();

        let files = backend.list(Path::new("docs")).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.pdf", "sub"]);
        assert_eq!(files[0].path, Path::new("docs/a.txt"));
        assert_eq!(files[0].size, 5);
        assert_eq!(files[1].content_type.as_deref(), Some("application/pdf"));
        assert!(files[2].is_directory);
        assert_eq!(files[2].content_type, None);
    }

    #[tokio::test]
    async fn test_list_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        assert!(backend.list(Path::new("")).await.unwrap().is_empty());
        std::fs::write(temp_dir.path().join("top.txt"), b"x").unwrap();
        let files = backend.list(Path::new("/")).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, Path::new("top.txt"));
    }

    #[tokio::test]
    async fn test_list_file_and_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        std::fs::write(temp_dir.path().join("single.txt"), b"abc").unwrap();
        let files = backend.list(Path::new("single.txt")).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "single.txt");
        assert_eq!(files[0].size, 3);
        let err = backend.list(Path::new("nope")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = backend.list(Path::new("../..")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_skips_broken_symlinks() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        std::fs::write(temp_dir.path().join("real.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("gone"), temp_dir.path().join("dangling")).unwrap();
        let files = backend.list(Path::new("")).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "real.txt");
    }

    #[tokio::test]
    async fn test_stat() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = backend(&temp_dir);
        let data = b"Hello, world!";
        std::fs::write(temp_dir.path().join("file.json"), data).unwrap();
        let info = backend.stat(Path::new("file.json")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("file.json"));
        assert_eq!(info.size, data.len() as u64);
        assert_eq!(info.content_type.as_deref(), Some("application/json"));
        assert!(!info.is_directory);
    }
}
