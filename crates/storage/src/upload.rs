//! Upload sources and caller-side upload policy.
//!
//! An [`Upload`] is the incoming content plus the filename the uploader
//! declared. Backends only use the declared filename for content-type
//! fallback and object metadata; the destination path is always chosen by
//! the caller (usually through [`UploadPolicy::destination`]).

use crate::backend::ContentReader;
use crate::error::{ErrorKind, Result};
use crate::path::{sanitize, sanitize_filename};
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

/// Content to be stored, with the filename declared by the uploader.
pub struct Upload {
    filename: String,
    size: Option<u64>,
    reader: ContentReader,
}
impl Upload {
    /// Wrap an arbitrary async reader. `size` is the declared length, if the
    /// caller knows it.
    pub fn from_reader(
        filename: impl Into<String>,
        size: Option<u64>,
        reader: impl AsyncRead + Send + 'static,
    ) -> Self {
        Self { filename: filename.into(), size, reader: Box::pin(reader) }
    }

    /// Upload an in-memory buffer.
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self::from_reader(filename, Some(size), Cursor::new(bytes))
    }

    /// Open a local file as an upload source, declaring its own file name.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        })?;
        let metadata = file.metadata().await.map_err(ErrorKind::Io)?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
        }
        let filename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(Self::from_reader(filename, Some(metadata.len()), file))
    }

    /// The filename as declared by the uploader (unsanitized).
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Declared content length, when known up front.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Lowercased extension of the declared filename, including the dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.filename)
    }

    pub fn into_reader(self) -> ContentReader {
        self.reader
    }

    /// Read the whole upload into memory.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.size.unwrap_or_default().min(8 * 1024 * 1024) as usize);
        self.reader.read_to_end(&mut buffer).await.map_err(ErrorKind::Io)?;
        Ok(buffer)
    }
}
impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload").field("filename", &self.filename).field("size", &self.size).finish_non_exhaustive()
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename).extension().map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

fn normalize_extension(ext: &str) -> String {
    format!(".{}", ext.trim().trim_start_matches('.').to_lowercase())
}

/// Size and type restrictions applied by the caller before handing content
/// to a backend, plus the naming scheme for stored uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Maximum accepted size in bytes; `None` disables the check
    pub max_size: Option<u64>,
    /// Accepted extensions (`.pdf` or `pdf`, case-insensitive); empty
    /// accepts every extension
    pub allowed_extensions: Vec<String>,
    /// Store uploads under a random UUID instead of the declared filename
    pub unique_names: bool,
}
impl UploadPolicy {
    /// Whether a declared filename passes the extension allow-list.
    pub fn allows(&self, filename: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let Some(ext) = extension_of(filename) else {
            return false;
        };
        self.allowed_extensions.iter().any(|allowed| normalize_extension(allowed) == ext)
    }

    /// Check the declared metadata of an upload without consuming it.
    pub fn check(&self, upload: &Upload) -> Result<()> {
        if let (Some(max), Some(size)) = (self.max_size, upload.size())
            && size > max
        {
            exn::bail!(ErrorKind::FileTooLarge { size, max });
        }
        if !self.allows(upload.filename()) {
            let ext = upload.extension().unwrap_or_else(|| upload.filename().to_string());
            exn::bail!(ErrorKind::FileTypeNotAllowed(ext));
        }
        Ok(())
    }

    /// [`check`](Self::check) the upload and, when its size is not known up
    /// front, buffer at most one byte past the limit to prove it fits.
    pub async fn enforce(&self, upload: Upload) -> Result<Upload> {
        self.check(&upload)?;
        let (Some(max), None) = (self.max_size, upload.size()) else {
            return Ok(upload);
        };
        let filename = upload.filename.clone();
        let mut buffer = Vec::new();
        upload
            .into_reader()
            .take(max.saturating_add(1))
            .read_to_end(&mut buffer)
            .await
            .map_err(ErrorKind::Io)?;
        let size = buffer.len() as u64;
        if size > max {
            exn::bail!(ErrorKind::FileTooLarge { size, max });
        }
        tracing::debug!(filename = %filename, bytes = size, "buffered upload of unknown size");
        Ok(Upload::from_bytes(filename, buffer))
    }

    /// Logical destination for an upload: the sanitized directory joined with
    /// either a fresh UUID (keeping the declared extension) or the sanitized
    /// declared filename.
    pub fn destination(&self, dir: impl AsRef<Path>, filename: &str) -> PathBuf {
        let safe = sanitize_filename(filename);
        let name = match self.unique_names {
            true => match Path::new(&safe).extension() {
                Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_string_lossy()),
                None => Uuid::new_v4().to_string(),
            },
            false => safe,
        };
        sanitize(dir).join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy(max_size: Option<u64>, allowed: &[&str]) -> UploadPolicy {
        UploadPolicy {
            max_size,
            allowed_extensions: allowed.iter().map(|s| s.to_string()).collect(),
            unique_names: false,
        }
    }

    #[rstest]
    #[case("photo.JPG", Some(".jpg"))]
    #[case("archive.tar.gz", Some(".gz"))]
    #[case("README", None)]
    #[case(".env", None)]
    fn test_extension(#[case] filename: &str, #[case] expected: Option<&str>) {
        assert_eq!(Upload::from_bytes(filename, b"x".to_vec()).extension().as_deref(), expected);
    }

    #[rstest]
    #[case(&[], "anything.exe", true)]
    #[case(&[".pdf", ".png"], "report.PDF", true)]
    #[case(&["pdf"], "report.pdf", true)]
    #[case(&[" .Png "], "image.png", true)]
    #[case(&[".pdf"], "script.exe", false)]
    #[case(&[".pdf"], "no-extension", false)]
    fn test_allows(#[case] allowed: &[&str], #[case] filename: &str, #[case] expected: bool) {
        assert_eq!(policy(None, allowed).allows(filename), expected);
    }

    #[test]
    fn test_check_rejects_declared_oversize() {
        let upload = Upload::from_bytes("a.txt", vec![0u8; 11]);
        let err = policy(Some(10), &[]).check(&upload).unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileTooLarge { size: 11, max: 10 }));
        assert!(policy(Some(11), &[]).check(&upload).is_ok());
    }

    #[test]
    fn test_check_rejects_type() {
        let upload = Upload::from_bytes("evil.EXE", b"MZ".to_vec());
        let err = policy(None, &[".pdf"]).check(&upload).unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileTypeNotAllowed(ext) if ext == ".exe"));
    }

    #[tokio::test]
    async fn test_enforce_unknown_size_within_limit() {
        let upload = Upload::from_reader("a.txt", None, Cursor::new(b"0123456789".to_vec()));
        let upload = policy(Some(10), &[]).enforce(upload).await.unwrap();
        assert_eq!(upload.size(), Some(10));
        assert_eq!(upload.into_bytes().await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_enforce_unknown_size_over_limit() {
        let upload = Upload::from_reader("a.txt", None, Cursor::new(vec![7u8; 1024]));
        let err = policy(Some(10), &[]).enforce(upload).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileTooLarge { size: 11, max: 10 }));
    }

    #[tokio::test]
    async fn test_enforce_known_size_passes_through() {
        let upload = Upload::from_bytes("a.txt", b"abc".to_vec());
        let upload = policy(Some(10), &[".txt"]).enforce(upload).await.unwrap();
        assert_eq!(upload.filename(), "a.txt");
        assert_eq!(upload.into_bytes().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_open_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let upload = Upload::open(&path).await.unwrap();
        assert_eq!(upload.filename(), "notes.txt");
        assert_eq!(upload.size(), Some(5));
        assert!(matches!(&*Upload::open(dir.path().join("missing")).await.unwrap_err(), ErrorKind::NotFound(_)));
        assert!(matches!(&*Upload::open(dir.path()).await.unwrap_err(), ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_destination_keeps_sanitized_name() {
        let policy = policy(None, &[]);
        assert_eq!(policy.destination("docs", "my:report?.pdf"), Path::new("docs/my_report_.pdf"));
        assert_eq!(policy.destination("../../etc", "../passwd"), Path::new("etc/passwd"));
        assert_eq!(policy.destination("", "a.txt"), Path::new("a.txt"));
    }

    #[test]
    fn test_destination_unique_names() {
        let policy = UploadPolicy { unique_names: true, ..Default::default() };
        let first = policy.destination("images", "cat.PNG");
        let second = policy.destination("images", "cat.PNG");
        assert_ne!(first, second);
        assert_eq!(first.parent().unwrap(), Path::new("images"));
        assert_eq!(first.extension().unwrap(), "PNG");
        let stem = first.file_stem().unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(stem).is_ok());
        let bare = policy.destination("", "Makefile");
        assert!(Uuid::parse_str(bare.to_str().unwrap()).is_ok());
    }
}
