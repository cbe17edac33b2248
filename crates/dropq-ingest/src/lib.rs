//! dropq Ingestion Library
//!
//! Watches a directory tree for delimited text files and delivers each file's
//! rows to a message queue inside one transaction per file.
//!
//! # Pipeline
//!
//! - **Discovery**: [`watcher::DirectoryWatcher`] registers every non-archive
//!   folder and feeds candidate files to [`watcher::StabilityTracker`]
//! - **Stability**: a file is ready once its size and mtime stop changing
//! - **Processing**: [`orchestrator::Orchestrator::process_file`] hashes,
//!   deduplicates, validates, parses, encodes and sends
//! - **Archival**: files end in `.processed` or `.error` next to where they
//!   were dropped
//!
//! Each folder carries one `*.properties` file describing its layout; see
//! [`folder::FolderConfig`].

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod encoder;
pub mod error;
pub mod folder;
pub mod layout;
pub mod orchestrator;
pub mod parser;
pub mod sender;
pub mod service;
pub mod transform;
pub mod value;
pub mod watcher;

pub use config::AppConfig;
pub use error::{ErrorKind, IngestError, Result};
pub use orchestrator::{Orchestrator, ProcessOutcome};
pub use service::IngestService;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dropq - file drop to message queue ingestion
#[derive(Parser, Debug)]
#[command(name = "dropq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML); defaults to ./dropq.toml when present
    #[arg(short, long, env = "DROPQ_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the root directory until interrupted
    Run,

    /// Process a single file and exit
    Process {
        /// File to ingest
        file: PathBuf,
    },

    /// Load and validate the configuration of one folder
    CheckConfig {
        /// Folder containing a *.properties file
        dir: PathBuf,
    },
}
