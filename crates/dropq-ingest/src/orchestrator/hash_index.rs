//! Persisted set of delivered content hashes

use dashmap::DashSet;
use dropq_common::checksum::ContentHash;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Append-only index: one lower-case hex digest per line.
///
/// The in-memory set is authoritative for lookups; the file only grows.
#[derive(Debug)]
pub struct HashIndex {
    path: PathBuf,
    hashes: DashSet<ContentHash>,
    append: Mutex<()>,
}

impl HashIndex {
    /// Load the index at `path`; a missing file is an empty index
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let hashes = DashSet::new();

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                for (n, line) in text.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match ContentHash::parse(line) {
                        Ok(hash) => {
                            hashes.insert(hash);
                        },
                        Err(e) => warn!(line = n + 1, error = %e, "Ignoring malformed hash index line"),
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }

        info!(path = %path.display(), hashes = hashes.len(), "Hash index loaded");
        Ok(Self {
            path,
            hashes,
            append: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Record `hash`; returns false if it was already known.
    ///
    /// The hash is visible to lookups even when persisting it fails.
    pub async fn insert(&self, hash: ContentHash) -> Result<bool> {
        let _guard = self.append.lock().await;
        if !self.hashes.insert(hash.clone()) {
            return Ok(false);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{hash}\n").as_bytes()).await?;
        file.flush().await?;

        debug!(hash = %hash, "Hash recorded");
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn hash(c: char) -> ContentHash {
        ContentHash::parse(&c.to_string().repeat(64)).unwrap()
    }

    #[tokio::test]
    async fn test_insert_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_hashes.idx");

        let index = HashIndex::load(&path).unwrap();
        assert!(index.is_empty());
        assert!(index.insert(hash('a')).await.unwrap());
        assert!(!index.insert(hash('a')).await.unwrap());
        assert!(index.insert(hash('b')).await.unwrap());

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);

        let reloaded = HashIndex::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(&hash('a')));
        assert!(!reloaded.contains(&hash('c')));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");
        std::fs::write(&path, format!("not-a-hash\n\n{}\n", "F".repeat(64))).unwrap();

        let index = HashIndex::load(&path).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains(&hash('f')));
    }
}
