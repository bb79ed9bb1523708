//! `filekit` command-line front end.
//!
//! Configuration comes from `--config`, the platform config directory and
//! `FILEKIT_*` environment variables (see `filekit-config`). Records are
//! printed to stdout as JSON; logs go to stderr.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{ArgAction, Parser, Subcommand};
use exn::ResultExt;
use filekit_config::Config;
use filekit_storage::{Provider, Upload, UploadPolicy};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "filekit", version, about = "Store and retrieve files on local disk or S3-compatible storage")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "FILEKIT_CONFIG")]
    config: Option<PathBuf>,
    /// Increase log verbosity (repeatable); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file
    Put {
        /// Local file to upload
        source: PathBuf,
        /// Storage directory to upload into, named by the upload policy
        #[arg(conflicts_with = "path")]
        dir: Option<PathBuf>,
        /// Exact storage path, bypassing generated names
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Write a stored file to stdout or a local file
    Get {
        path: PathBuf,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a stored file
    Rm { path: PathBuf },
    /// Check whether a path exists (exit status 1 when absent)
    Exists { path: PathBuf },
    /// List the direct children of a directory
    Ls {
        /// Defaults to the storage root
        dir: Option<PathBuf>,
    },
    /// Show metadata for a stored file
    Stat { path: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("error: {e:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<bool> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let provider = Provider::connect(&config.storage).await.or_raise(|| ErrorKind::Storage)?.with_timeout(config.timeout());
    execute(&provider, &config.upload_policy(), cli.command).await
}

/// Run one command; `Ok(false)` means the command itself reports failure
/// (only `exists` on a missing path).
async fn execute(provider: &Provider, policy: &UploadPolicy, command: Command) -> Result<bool> {
    match command {
        Command::Put { source, dir, path } => {
            let upload = Upload::open(&source).await.or_raise(|| ErrorKind::Source(source.clone()))?;
            let upload = policy.enforce(upload).await.or_raise(|| ErrorKind::Rejected)?;
            let destination = path.unwrap_or_else(|| policy.destination(dir.unwrap_or_default(), upload.filename()));
            let info = provider.upload(upload, &destination).await.or_raise(|| ErrorKind::Storage)?;
            print_json(&info)?;
        },
        Command::Get { path, output } => {
            let (mut reader, info) = provider.get(&path).await.or_raise(|| ErrorKind::Storage)?;
            let copied = match output {
                Some(output) => {
                    let mut file = tokio::fs::File::create(&output).await.or_raise(|| ErrorKind::Output)?;
                    let copied = tokio::io::copy(&mut reader, &mut file).await.or_raise(|| ErrorKind::Output)?;
                    file.flush().await.or_raise(|| ErrorKind::Output)?;
                    copied
                },
                None => {
                    let mut stdout = tokio::io::stdout();
                    let copied = tokio::io::copy(&mut reader, &mut stdout).await.or_raise(|| ErrorKind::Output)?;
                    stdout.flush().await.or_raise(|| ErrorKind::Output)?;
                    copied
                },
            };
            tracing::info!(path = %info.path.display(), bytes = copied, "file retrieved");
        },
        Command::Rm { path } => {
            provider.delete(&path).await.or_raise(|| ErrorKind::Storage)?;
        },
        Command::Exists { path } => {
            let exists = provider.exists(&path).await.or_raise(|| ErrorKind::Storage)?;
            println!("{exists}");
            return Ok(exists);
        },
        Command::Ls { dir } => {
            let files = provider.list(&dir.unwrap_or_default()).await.or_raise(|| ErrorKind::Storage)?;
            print_json(&files)?;
        },
        Command::Stat { path } => {
            let info = provider.stat(&path).await.or_raise(|| ErrorKind::Storage)?;
            print_json(&info)?;
        },
    }
    Ok(true)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).or_raise(|| ErrorKind::Output)?;
    writeln!(stdout).or_raise(|| ErrorKind::Output)?;
    Ok(())
}
