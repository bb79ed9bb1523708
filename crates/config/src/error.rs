//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An explicitly requested configuration file does not exist
    #[display("configuration file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Configuration file extension is not one of `toml`, `yaml`, `yml` or `json`
    #[display("unsupported configuration format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// Sources could not be read or merged into the expected shape
    #[display("failed to load configuration")]
    Load,
    /// Configuration loaded but describes an unusable setup
    #[display("invalid configuration: {}", _0.join("; "))]
    Invalid(#[error(not(source))] Vec<String>),
}

impl ErrorKind {
    /// Every individual problem, for reporting one per line.
    pub fn problems(&self) -> &[String] {
        match self {
            Self::Invalid(problems) => problems,
            _ => &[],
        }
    }
}
