//! Layered configuration for filekit.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults (local storage under `./storage/uploads`).
//! 2. A TOML, YAML or JSON file, either given explicitly or found at the
//!    platform config directory (`~/.config/filekit/config.toml` on Linux).
//! 3. Environment variables prefixed with `FILEKIT_`, nesting with `__`
//!    (`FILEKIT_STORAGE__TYPE=s3`, `FILEKIT_UPLOAD__MAX_SIZE_MB=25`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use filekit_storage::UploadPolicy;
use filekit_storage::config::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "FILEKIT_";
const ENV_SEPARATOR: &str = "__";
const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub upload: UploadConfig,
}

/// Caller-side upload restrictions and per-operation deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_size_mb: u64,
    /// Accepted extensions; an empty list accepts everything
    pub allowed_types: Vec<String>,
    /// Store uploads under random UUID names
    pub unique_names: bool,
    pub timeout_secs: u64,
}
impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 10,
            allowed_types: [".jpg", ".jpeg", ".png", ".gif", ".pdf", ".doc", ".docx", ".xls", ".xlsx"]
                .into_iter()
                .map(String::from)
                .collect(),
            unique_names: true,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Default configuration file location, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "filekit").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when a file is present there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match path {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                figment = merge_file(figment, path)?;
            },
            None => {
                if let Some(default) = Self::default_path().filter(|p| p.is_file()) {
                    figment = merge_file(figment, &default)?;
                }
            },
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(storage = config.storage.kind(), "configuration loaded");
        Ok(config)
    }

    /// Check the whole configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = self.storage.validate();
        if self.upload.max_size_mb == 0 {
            problems.push("upload max size must be greater than 0".to_string());
        }
        if self.upload.timeout_secs == 0 {
            problems.push("upload timeout must be greater than 0 seconds".to_string());
        }
        if self.upload.allowed_types.iter().any(|t| t.trim().trim_start_matches('.').is_empty()) {
            problems.push("allowed upload types must not contain empty entries".to_string());
        }
        match problems.is_empty() {
            true => Ok(()),
            false => exn::bail!(ErrorKind::Invalid(problems)),
        }
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_size: Some(self.upload.max_size_mb.saturating_mul(BYTES_PER_MB)),
            allowed_extensions: self.upload.allowed_types.clone(),
            unique_names: self.upload.unique_names,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.upload.timeout_secs)
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().map(|ext| ext.to_string_lossy().to_lowercase());
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}
