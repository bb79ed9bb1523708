//! Storage for uploaded files on local disk or S3-compatible object stores,
//! addressed by logical forward-slash paths relative to a configured root.

pub mod backend;
pub mod config;
pub mod error;
mod file;
pub mod mime;
pub mod path;
mod provider;
mod upload;

pub use crate::backend::StorageBackend;
pub use crate::file::FileInfo;
pub use crate::path::validate as validate_path;
pub use crate::provider::Provider;
pub use crate::upload::{Upload, UploadPolicy};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
