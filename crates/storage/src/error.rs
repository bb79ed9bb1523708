//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Callers are expected to map these onto their own surface (HTTP status,
//! process exit code, etc). Nothing in this crate does that mapping.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
///
/// ### Addressing Errors
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::AlreadyExists`]
/// - [`ErrorKind::InvalidPath`]
///
/// ### I/O Failures
/// See [`ErrorKind::is_io_failure`].
///
/// ### Construction Errors
/// - [`ErrorKind::Configuration`]
///
/// ### Upload Policy
/// - [`ErrorKind::FileTooLarge`]
/// - [`ErrorKind::FileTypeNotAllowed`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Path does not exist at the time of the operation
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Upload destination is already occupied
    #[display("file already exists: {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    /// Path escapes the root, is malformed, or is a directory where a file
    /// was required (and vice versa)
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Network-related error (S3 connections, etc.)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Operation did not complete before its deadline
    #[display("operation timed out")]
    Timeout,
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
    /// Backend construction received invalid or incomplete settings
    #[display("invalid storage configuration: {_0}")]
    Configuration(#[error(not(source))] String),
    /// Upload content is larger than the configured limit
    #[display("file size of {size} bytes exceeds the maximum allowed size of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },
    /// Upload extension is not in the configured allow-list
    #[display("file type '{_0}' is not allowed")]
    FileTypeNotAllowed(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::Timeout | Self::BackendError(_))
    }

    /// Returns `true` when the underlying medium failed for reasons unrelated
    /// to the addressed path (permissions, connectivity, deadlines).
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::PermissionDenied(_) | Self::Network(_) | Self::Timeout | Self::BackendError(_)
        )
    }
}
