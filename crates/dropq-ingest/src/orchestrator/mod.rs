//! Per-file ingestion: hash, dedup, validate, deliver, archive
//!
//! `process_file` always ends in a terminal outcome. Errors never escape it;
//! they become an `.error` archive with a report next to it.

use chrono::Local;
use dropq_common::checksum::ContentHash;
use futures::{future, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::encoder::MessageEncoder;
use crate::error::{ErrorKind, IngestError, Result};
use crate::folder::{FolderConfig, FolderConfigCache};
use crate::layout;
use crate::parser::{self, FieldTransforms, RowReader};
use crate::sender::{send_batch, TransactionalSender};
use crate::transform::TransformRegistry;
use crate::value::Row;

pub mod archive;
pub mod hash_index;
pub mod journal;

pub use archive::{ArchiveKind, ErrorReport};
pub use hash_index::HashIndex;
pub use journal::Journal;

/// Rows buffered between the parsing thread and the sender
pub const ROW_CHANNEL_CAPACITY: usize = 64;

/// Terminal result of processing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Not an ingestible file; left untouched
    Skipped,
    /// Content already delivered; archived without sending
    Duplicate { archive: PathBuf },
    Delivered { messages: usize, archive: PathBuf },
    /// Quarantined; `archive` is `None` when even the move failed
    Failed {
        kind: ErrorKind,
        message: String,
        archive: Option<PathBuf>,
    },
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Skipped => "SKIPPED",
            ProcessOutcome::Duplicate { .. } => "DUPLICATE",
            ProcessOutcome::Delivered { .. } => "DELIVERED",
            ProcessOutcome::Failed { .. } => "FAILED",
        }
    }

    pub fn details(&self) -> String {
        match self {
            ProcessOutcome::Skipped => String::new(),
            ProcessOutcome::Duplicate { archive } => format!("archive={}", archive.display()),
            ProcessOutcome::Delivered { messages, archive } => {
                format!("messages={messages} archive={}", archive.display())
            },
            ProcessOutcome::Failed {
                kind,
                message,
                archive,
            } => match archive {
                Some(archive) => format!("kind={kind} archive={} error={message:?}", archive.display()),
                None => format!("kind={kind} error={message:?}"),
            },
        }
    }

    pub fn archive(&self) -> Option<&Path> {
        match self {
            ProcessOutcome::Skipped => None,
            ProcessOutcome::Duplicate { archive } | ProcessOutcome::Delivered { archive, .. } => {
                Some(archive)
            },
            ProcessOutcome::Failed { archive, .. } => archive.as_deref(),
        }
    }
}

/// Running totals since start-up
#[derive(Debug, Default)]
pub struct IngestStats {
    delivered: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
    messages: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub messages: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Skipped => {},
            ProcessOutcome::Duplicate { .. } => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
            },
            ProcessOutcome::Delivered { messages, .. } => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.messages.fetch_add(*messages as u64, Ordering::Relaxed);
            },
            ProcessOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}

/// What the fallible part of the pipeline produced
enum Ingested {
    Duplicate,
    Delivered { messages: usize, hash: ContentHash },
}

pub struct Orchestrator {
    config: Arc<AppConfig>,
    configs: FolderConfigCache,
    registry: Arc<TransformRegistry>,
    sender: Arc<dyn TransactionalSender>,
    hashes: HashIndex,
    journal: Journal,
    stats: IngestStats,
}

impl Orchestrator {
    /// Build an orchestrator, loading the hash index from the root
    pub fn new(
        config: Arc<AppConfig>,
        sender: Arc<dyn TransactionalSender>,
        registry: Arc<TransformRegistry>,
    ) -> Result<Self> {
        let hashes = HashIndex::load(config.root_dir.join(layout::HASH_INDEX_FILE))?;
        let journal = Journal::new(config.log_folder(), config.fallback_log_name.clone());

        Ok(Self {
            config,
            configs: FolderConfigCache::new(),
            registry,
            sender,
            hashes,
            journal,
            stats: IngestStats::default(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn hash_index(&self) -> &HashIndex {
        &self.hashes
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether `path` is a regular file the pipeline should ingest
    pub fn is_eligible(&self, path: &Path) -> bool {
        path.is_file()
            && layout::is_candidate(path, &self.config.root_dir, &self.config.supported_extensions)
    }

    /// Run one file to its terminal outcome
    pub async fn process_file(&self, path: &Path) -> ProcessOutcome {
        if !self.is_eligible(path) {
            debug!(path = %path.display(), "Not eligible, skipping");
            return ProcessOutcome::Skipped;
        }

        let started = Instant::now();
        info!(path = %path.display(), "Processing file");

        let mut folder_config = None;
        let outcome = match self.ingest(path, &mut folder_config).await {
            Ok(Ingested::Duplicate) => self.archive_duplicate(path).await,
            Ok(Ingested::Delivered { messages, hash }) => self.archive_delivered(path, messages, hash).await,
            Err(e) => self.quarantine(path, &e).await,
        };

        self.stats.record(&outcome);
        self.journal
            .record(folder_config.as_deref(), path, &outcome)
            .await;

        info!(
            path = %path.display(),
            outcome = outcome.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "File processed"
        );
        outcome
    }

    async fn ingest(
        &self,
        path: &Path,
        folder_config: &mut Option<Arc<FolderConfig>>,
    ) -> Result<Ingested> {
        let owned = path.to_path_buf();
        let hash = tokio::task::spawn_blocking(move || ContentHash::from_file(owned)).await??;
        debug!(path = %path.display(), hash = %hash, "Content hashed");

        if self.config.check_hash_before_copy && self.hashes.contains(&hash) {
            info!(path = %path.display(), hash = %hash, "Duplicate content, not sending");
            return Ok(Ingested::Duplicate);
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let config = self
            .configs
            .resolve(dir)?
            .ok_or_else(|| IngestError::MissingConfig(dir.to_path_buf()))?;
        *folder_config = Some(Arc::clone(&config));

        let transforms = FieldTransforms::resolve(&config, &self.registry)?;

        let records = {
            let path = path.to_path_buf();
            let config = Arc::clone(&config);
            tokio::task::spawn_blocking(move || parser::validate_structure(&path, &config)).await??
        };
        debug!(path = %path.display(), records, "Structure valid");

        let messages = self.deliver(path, config, transforms).await?;
        Ok(Ingested::Delivered { messages, hash })
    }

    /// Parse on a blocking thread and send every row in one transaction
    async fn deliver(
        &self,
        path: &Path,
        config: Arc<FolderConfig>,
        transforms: FieldTransforms,
    ) -> Result<usize> {
        let encoder = MessageEncoder::new(&config.table_version, &self.config.credentials);
        let (tx, rx) = mpsc::channel::<Result<Row>>(ROW_CHANNEL_CAPACITY);

        let producer = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || {
                let rows = match RowReader::open(&path, config, transforms) {
                    Ok(rows) => rows,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        return;
                    },
                };
                for row in rows {
                    if tx.blocking_send(row).is_err() {
                        break;
                    }
                }
            })
        };

        let messages = ReceiverStream::new(rx).filter_map(move |row| {
            future::ready(match row {
                Ok(row) => encoder.encode(&row).map(Ok),
                Err(e) => Some(Err(e)),
            })
        });

        let sent = send_batch(self.sender.as_ref(), messages).await;
        producer.await?;
        sent
    }

    async fn archive_duplicate(&self, path: &Path) -> ProcessOutcome {
        match self.archive(path, ArchiveKind::Processed).await {
            Ok(archive) => ProcessOutcome::Duplicate { archive },
            Err(e) => self.quarantine(path, &e).await,
        }
    }

    async fn archive_delivered(&self, path: &Path, messages: usize, hash: ContentHash) -> ProcessOutcome {
        if self.config.check_hash_before_copy {
            if let Err(e) = self.hashes.insert(hash.clone()).await {
                warn!(path = %path.display(), error = %e, "Failed to persist hash");
            }
        }

        let archive = match self.archive(path, ArchiveKind::Processed).await {
            Ok(archive) => archive,
            Err(e) => {
                error!(
                    path = %path.display(),
                    messages,
                    error = %e,
                    "Delivered but could not archive"
                );
                return self.quarantine(path, &e).await;
            },
        };

        if self.config.write_hash_sidecar {
            if let Err(e) = archive::write_hash_sidecar(&archive, &hash) {
                warn!(archive = %archive.display(), error = %e, "Failed to write hash sidecar");
            }
        }

        ProcessOutcome::Delivered { messages, archive }
    }

    async fn archive(&self, path: &Path, kind: ArchiveKind) -> Result<PathBuf> {
        let path = path.to_path_buf();
        let at = Local::now();
        let archived = tokio::task::spawn_blocking(move || archive::archive_file(&path, kind, &at)).await??;
        Ok(archived)
    }

    async fn quarantine(&self, path: &Path, err: &IngestError) -> ProcessOutcome {
        let kind = err.kind();
        let message = err.to_string();
        error!(path = %path.display(), kind = %kind, error = %message, "File failed");

        let report = ErrorReport::new(path, err, Local::now());
        let archive = match self.archive(path, ArchiveKind::Error).await {
            Ok(archive) => {
                if let Err(e) = report.write_next_to(&archive) {
                    warn!(archive = %archive.display(), error = %e, "Failed to write error report");
                }
                Some(archive)
            },
            Err(e) => {
                error!(path = %path.display(), error = %e, "Could not move file to the error archive");
                None
            },
        };

        ProcessOutcome::Failed {
            kind,
            message,
            archive,
        }
    }
}
