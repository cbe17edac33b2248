//! Terminal moves into `.processed` / `.error` and their companion files

use chrono::{DateTime, Local};
use dropq_common::checksum::ContentHash;
use std::error::Error as StdError;
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ErrorKind, IngestError};
use crate::layout;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Processed,
    Error,
}

impl ArchiveKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            ArchiveKind::Processed => layout::PROCESSED_DIR,
            ArchiveKind::Error => layout::ERROR_DIR,
        }
    }
}

/// `<stem>_<yyyyMMdd_HHmmss>[-N]<.ext>`
fn archive_name(file: &Path, at: &DateTime<Local>, attempt: u32) -> String {
    let stem = file
        .file_stem()
        .map(OsStr::to_string_lossy)
        .unwrap_or_default();
    let ext = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = at.format(TIMESTAMP_FORMAT);

    if attempt == 0 {
        format!("{stem}_{stamp}{ext}")
    } else {
        format!("{stem}_{stamp}-{attempt}{ext}")
    }
}

/// First free archive path for `file`, creating the archive folder if needed
pub fn archive_target(file: &Path, kind: ArchiveKind, at: &DateTime<Local>) -> io::Result<PathBuf> {
    let parent = file.parent().unwrap_or_else(|| Path::new("."));
    let dir = parent.join(kind.dir_name());
    fs::create_dir_all(&dir)?;

    let mut attempt = 0;
    loop {
        let target = dir.join(archive_name(file, at, attempt));
        if !target.exists() {
            return Ok(target);
        }
        attempt += 1;
    }
}

/// Move `file` into its archive folder and return the new path
pub fn archive_file(file: &Path, kind: ArchiveKind, at: &DateTime<Local>) -> io::Result<PathBuf> {
    let target = archive_target(file, kind, at)?;
    move_file(file, &target)?;
    debug!(from = %file.display(), to = %target.display(), "Archived");
    Ok(target)
}

/// Rename, falling back to copy + remove when the rename is refused
/// (typically across filesystems).
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    let Err(rename_err) = fs::rename(from, to) else {
        return Ok(());
    };
    debug!(from = %from.display(), error = %rename_err, "Rename failed, copying instead");

    if let Err(copy_err) = fs::copy(from, to) {
        let _ = fs::remove_file(to);
        return Err(if from.exists() { copy_err } else { rename_err });
    }
    fs::remove_file(from)
}

/// `<archived>.sha256` in `sha256sum` format
pub fn write_hash_sidecar(archived: &Path, hash: &ContentHash) -> io::Result<PathBuf> {
    let path = companion(archived, &format!(".{}", layout::HASH_SIDECAR_EXT));
    let name = archived
        .file_name()
        .map(OsStr::to_string_lossy)
        .unwrap_or_default();
    fs::write(&path, format!("{hash}  {name}\n"))?;
    Ok(path)
}

fn companion(archived: &Path, suffix: &str) -> PathBuf {
    let mut name = archived.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// What went wrong with one file, as written next to it in `.error`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub time: DateTime<Local>,
    pub file: String,
    pub kind: ErrorKind,
    pub message: String,
    pub causes: Vec<String>,
}

impl ErrorReport {
    pub fn new(file: &Path, err: &IngestError, time: DateTime<Local>) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            time,
            file: file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string()),
            kind: err.kind(),
            message: err.to_string(),
            causes,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "time:  {}", self.time.to_rfc3339());
        let _ = writeln!(out, "file:  {}", self.file);
        let _ = writeln!(out, "kind:  {}", self.kind);
        let _ = writeln!(out, "error: {}", self.message);
        if !self.causes.is_empty() {
            let _ = writeln!(out, "caused by:");
            for (i, cause) in self.causes.iter().enumerate() {
                let _ = writeln!(out, "  {i}: {cause}");
            }
        }
        out
    }

    /// Write `<archived>.err.txt`
    pub fn write_next_to(&self, archived: &Path) -> io::Result<PathBuf> {
        let path = companion(archived, layout::ERROR_REPORT_SUFFIX);
        fs::write(&path, self.render())?;
        Ok(path)
    }
}
