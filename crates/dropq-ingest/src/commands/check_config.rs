//! `dropq check-config <dir>`

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use crate::folder::{FolderConfig, FolderConfigCache};
use crate::parser::FieldTransforms;
use crate::transform::TransformRegistry;

/// Locate, parse and validate the folder configuration of `dir`,
/// including that every configured transform exists
pub fn run(dir: &Path, registry: &TransformRegistry) -> Result<(PathBuf, FolderConfig)> {
    let path = FolderConfigCache::locate(dir)?
        .ok_or_else(|| anyhow!("no *.properties file in {}", dir.display()))?;
    let config = FolderConfig::load(&path)?;
    FieldTransforms::resolve(&config, registry)?;
    Ok((path, config))
}
