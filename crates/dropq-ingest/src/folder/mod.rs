//! Folder configuration: file format, model and cache

pub mod cache;
pub mod config;
pub mod properties;

pub use cache::FolderConfigCache;
pub use config::{ControlMode, FolderConfig, TransformSpec};
