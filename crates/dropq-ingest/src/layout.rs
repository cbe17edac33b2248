//! Reserved names of the ingestion directory tree

use std::ffi::OsStr;
use std::path::{Component, Path};

/// Archive subfolder for delivered and duplicate files
pub const PROCESSED_DIR: &str = ".processed";

/// Archive subfolder for quarantined files
pub const ERROR_DIR: &str = ".error";

/// Extension of the per-folder configuration file
pub const CONFIG_EXT: &str = "properties";

/// Extension of the hash sidecar written next to processed archives
pub const HASH_SIDECAR_EXT: &str = "sha256";

/// Suffix of the human-readable error report
pub const ERROR_REPORT_SUFFIX: &str = ".err.txt";

/// Append-only hash index, kept at the root
pub const HASH_INDEX_FILE: &str = "processed_hashes.idx";

/// Directories the watcher never descends into.
///
/// The archive folders are dot-prefixed, so the hidden-name rule covers them too.
pub fn is_reserved_dir_name(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name == PROCESSED_DIR || name == ERROR_DIR || name.starts_with('.')
}

/// Whether `path` lives below a reserved directory, relative to `root`.
///
/// Paths outside `root` are judged by their immediate parent only.
pub fn in_reserved_dir(path: &Path, root: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };

    match parent.strip_prefix(root) {
        Ok(relative) => relative.components().any(|c| match c {
            Component::Normal(name) => is_reserved_dir_name(name),
            _ => false,
        }),
        Err(_) => parent.file_name().is_some_and(is_reserved_dir_name),
    }
}

/// File names the pipeline writes or reads itself
pub fn is_reserved_file_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    name == HASH_INDEX_FILE
        || name.starts_with('.')
        || lower.ends_with(ERROR_REPORT_SUFFIX)
        || has_extension(name, CONFIG_EXT)
        || has_extension(name, HASH_SIDECAR_EXT)
}

fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Name-based eligibility: not reserved, not archived, supported extension.
///
/// Does not touch the filesystem; callers check the file type separately.
pub fn is_candidate(path: &Path, root: &Path, supported_extensions: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(OsStr::to_str) else {
        return false;
    };

    if is_reserved_file_name(name) || in_reserved_dir(path, root) {
        return false;
    }

    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| supported_extensions.iter().any(|s| *s == ext))
}
