//! dropq Common Library
//!
//! Shared utilities for the dropq workspace.
//!
//! - **Error Handling**: [`DropqError`] and the [`Result`] alias
//! - **Checksums**: SHA-256 content hashing used for deduplication
//! - **Logging**: tracing subscriber bootstrap
//!
//! # Example
//!
//! ```no_run
//! use dropq_common::checksum::ContentHash;
//!
//! fn fingerprint(path: &str) -> dropq_common::Result<()> {
//!     let hash = ContentHash::from_file(path)?;
//!     tracing::info!(%hash, "fingerprinted");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{DropqError, Result};
