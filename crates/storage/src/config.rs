//! Backend configuration.
//!
//! Plain data, deserializable from any serde source. Nothing in this crate
//! reads the process environment; loading is the caller's job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default root for the local backend, relative to the working directory.
pub const DEFAULT_LOCAL_ROOT: &str = "./storage/uploads";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory every stored file lives under
    pub root: PathBuf,
    /// Public URL prefix for stored files
    pub base_url: Option<String>,
    /// Create missing parent directories on upload
    pub create_directories: bool,
}
impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_LOCAL_ROOT),
            base_url: None,
            create_directories: true,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Custom endpoint for S3-compatible services (MinIO, Backblaze, ...)
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: String,
    /// Key prefix acting as the storage root inside the bucket
    pub prefix: Option<String>,
    /// Public URL prefix overriding the generated object URLs
    pub base_url: Option<String>,
    pub region: Option<String>,
    /// Scheme for an endpoint given without one (`https` when true)
    pub use_ssl: bool,
    /// Path-style addressing (`{endpoint}/{bucket}/{key}`)
    pub path_style: bool,
}
impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key: None,
            secret_key: None,
            bucket: String::new(),
            prefix: None,
            base_url: None,
            region: None,
            use_ssl: true,
            path_style: false,
        }
    }
}
impl S3Config {
    /// Custom endpoint with a scheme, if one is configured.
    pub fn endpoint_url(&self) -> Option<String> {
        let endpoint = self.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
        Some(match endpoint.contains("://") {
            true => endpoint.trim_end_matches('/').to_string(),
            false => {
                let scheme = if self.use_ssl { "https" } else { "http" };
                format!("{scheme}://{}", endpoint.trim_end_matches('/'))
            },
        })
    }

    /// Static credentials, when both halves are present.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        let key = self.access_key.as_deref().filter(|k| !k.is_empty())?;
        let secret = self.secret_key.as_deref().filter(|s| !s.is_empty())?;
        Some((key, secret))
    }
}
impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("base_url", &self.base_url)
            .field("region", &self.region)
            .field("use_ssl", &self.use_ssl)
            .field("path_style", &self.path_style)
            .finish()
    }
}

/// Which backend to build, with its settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local(LocalConfig),
    S3(S3Config),
}
impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local(LocalConfig::default())
    }
}
impl StorageConfig {
    /// Backend kind as written in configuration files.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::S3(_) => "s3",
        }
    }

    /// Every problem with this configuration; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        match self {
            Self::Local(local) => {
                if local.root.as_os_str().is_empty() {
                    problems.push("local storage root must not be empty".to_string());
                }
            },
            Self::S3(s3) => {
                if s3.bucket.trim().is_empty() {
                    problems.push("S3 bucket name is required when using S3 storage".to_string());
                }
                if s3.endpoint_url().is_some() {
                    if s3.access_key.as_deref().is_none_or(str::is_empty) {
                        problems.push("S3 access key is required when using a custom S3 endpoint".to_string());
                    }
                    if s3.secret_key.as_deref().is_none_or(str::is_empty) {
                        problems.push("S3 secret key is required when using a custom S3 endpoint".to_string());
                    }
                }
            },
        }
        problems
    }
}
