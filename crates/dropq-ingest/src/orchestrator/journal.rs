//! Per-folder outcome journal
//!
//! One line per terminal outcome: `<time> <OUTCOME> <file> <details>`.

use chrono::{Local, SecondsFormat};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::ProcessOutcome;
use crate::folder::FolderConfig;

#[derive(Debug)]
pub struct Journal {
    folder: PathBuf,
    fallback: String,
    append: Mutex<()>,
}

impl Journal {
    pub fn new(folder: impl Into<PathBuf>, fallback: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            fallback: fallback.into(),
            append: Mutex::new(()),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Append one line; failures are logged and otherwise ignored
    pub async fn record(&self, config: Option<&FolderConfig>, file: &Path, outcome: &ProcessOutcome) {
        let line = format!(
            "{} {} {} {}\n",
            Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            outcome.label(),
            file.display(),
            outcome.details()
        );

        let _guard = self.append.lock().await;
        if let Some(config) = config {
            let primary = self.path_for(&config.log_file_name);
            match self.append_line(&primary, &line).await {
                Ok(()) => return,
                Err(e) => warn!(journal = %primary.display(), error = %e, "Journal append failed, using fallback"),
            }
        }

        let fallback_name = config
            .map(|c| c.fallback_log_file_name.as_str())
            .unwrap_or(&self.fallback);
        let fallback = self.path_for(fallback_name);
        if let Err(e) = self.append_line(&fallback, &line).await {
            warn!(journal = %fallback.display(), error = %e, "Fallback journal append failed");
        }
    }

    /// Only the final component of a configured name is honoured
    fn path_for(&self, name: &str) -> PathBuf {
        let name = Path::new(name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| self.fallback.clone().into());
        self.folder.join(name)
    }

    async fn append_line(&self, path: &Path, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.folder).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::folder::properties;

    fn folder_config(log: &str) -> FolderConfig {
        let props = properties::parse(&format!(
            "tableVersion=CUSTOMER\nisFirstLineHeader=true\nlogFileName={log}\n"
        ));
        FolderConfig::from_properties(&props, "CUSTOMER").unwrap()
    }

    #[tokio::test]
    async fn test_lines_go_to_folder_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("logs"), "fallback.log");
        let config = folder_config("customer.log");

        let outcome = ProcessOutcome::Delivered {
            messages: 2,
            archive: PathBuf::from("/in/.processed/a_1.csv"),
        };
        journal.record(Some(&config), Path::new("/in/a.csv"), &outcome).await;
        journal.record(Some(&config), Path::new("/in/b.csv"), &outcome).await;

        let text = std::fs::read_to_string(dir.path().join("logs/customer.log")).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" DELIVERED /in/a.csv messages=2"));
    }

    #[tokio::test]
    async fn test_unknown_folder_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path(), "fallback.log");

        let outcome = ProcessOutcome::Failed {
            kind: crate::error::ErrorKind::Configuration,
            message: "no folder configuration".to_string(),
            archive: None,
        };
        journal.record(None, Path::new("/in/x.csv"), &outcome).await;

        let text = std::fs::read_to_string(dir.path().join("fallback.log")).unwrap();
        assert!(text.contains(" FAILED /in/x.csv kind=configuration"));
    }
}
