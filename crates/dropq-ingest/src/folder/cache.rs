//! Folder configuration lookup with modification-time invalidation

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

use super::config::FolderConfig;
use crate::error::{IngestError, Result};
use crate::layout::CONFIG_EXT;

#[derive(Debug)]
struct CachedConfig {
    modified: SystemTime,
    config: Arc<FolderConfig>,
}

/// Cache of parsed folder configs, keyed by config file path.
///
/// An entry is reused only while its file's modification time is unchanged.
#[derive(Debug, Default)]
pub struct FolderConfigCache {
    entries: DashMap<PathBuf, CachedConfig>,
}

impl FolderConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate the single config file in `dir`.
    ///
    /// Zero files is `Ok(None)`; more than one is an error rather than a guess.
    pub fn locate(dir: &Path) -> Result<Option<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_config = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(CONFIG_EXT));
            if is_config && entry.file_type()?.is_file() {
                found.push(path);
            }
        }

        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            count => Err(IngestError::AmbiguousConfig {
                dir: dir.to_path_buf(),
                count,
            }),
        }
    }

    /// Config for the folder `dir`, or `None` when it has no config file
    pub fn resolve(&self, dir: &Path) -> Result<Option<Arc<FolderConfig>>> {
        match Self::locate(dir)? {
            Some(path) => self.get(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Parsed config at `path`, reparsed when its modification time changed
    pub fn get(&self, path: &Path) -> Result<Arc<FolderConfig>> {
        let modified = std::fs::metadata(path)?.modified()?;

        if let Some(cached) = self.entries.get(path) {
            if cached.modified == modified {
                debug!(path = %path.display(), "Folder config cache hit");
                return Ok(cached.config.clone());
            }
        }

        let config = Arc::new(FolderConfig::load(path)?);
        info!(
            path = %path.display(),
            table = %config.table_version,
            "Loaded folder config"
        );

        self.entries.insert(
            path.to_path_buf(),
            CachedConfig {
                modified,
                config: config.clone(),
            },
        );
        Ok(config)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
