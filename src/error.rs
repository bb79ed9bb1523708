//! Command-line Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("storage operation failed")]
    Storage,
    #[display("cannot read upload source {}", _0.display())]
    Source(#[error(not(source))] PathBuf),
    #[display("upload rejected by policy")]
    Rejected,
    #[display("could not write output")]
    Output,
}
