//! Shared helpers for dropq-ingest integration tests
//!
//! Every test gets its own temporary root with one or more inbox folders and
//! an in-memory queue standing in for the broker.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use dropq_ingest::config::AppConfig;
use dropq_ingest::error::{IngestError, Result};
use dropq_ingest::sender::{MemoryQueue, Transaction, TransactionalSender};
use dropq_ingest::transform::TransformRegistry;
use dropq_ingest::Orchestrator;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::{fmt, EnvFilter};

/// Customer folder: header line, `|` multi-values, `^` sub-values
pub const CUSTOMER_CONFIG: &str = "\
# customer feed
tableVersion=CUSTOMER
isFirstLineHeader=true
fieldDelimiter=,
recordDelimiter=\\n
multiValueDelimiter=|
subValueDelimiter=^
logFileName=customer.log
";

pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dropq_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Temporary ingestion root
pub struct TestRoot {
    pub dir: TempDir,
}

impl TestRoot {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp root"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Short timings so service tests finish quickly
    pub fn config(&self) -> AppConfig {
        AppConfig::default()
            .with_root_dir(self.path())
            .with_stability(Duration::from_millis(200), Duration::from_secs(10))
            .with_scan_interval(Duration::from_millis(50))
            .with_workers(2)
            .with_shutdown_grace(Duration::from_secs(5))
    }

    /// Create `<root>/<name>` with the given folder configuration
    pub fn inbox(&self, name: &str, properties: &str) -> PathBuf {
        let dir = self.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}.properties", name.to_lowercase())), properties).unwrap();
        dir
    }

    pub fn orchestrator(&self, sender: Arc<dyn TransactionalSender>) -> Orchestrator {
        self.orchestrator_with(self.config(), sender)
    }

    pub fn orchestrator_with(&self, config: AppConfig, sender: Arc<dyn TransactionalSender>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(config),
            sender,
            Arc::new(TransformRegistry::with_builtins()),
        )
        .expect("Failed to build orchestrator")
    }
}

pub fn memory_queue() -> (MemoryQueue, Arc<dyn TransactionalSender>) {
    let queue = MemoryQueue::new();
    let sender: Arc<dyn TransactionalSender> = Arc::new(queue.clone());
    (queue, sender)
}

/// Entries of an archive folder, sorted
pub fn archived(dir: &Path, archive: &str) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir.join(archive)) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Broker that refuses every transaction
#[derive(Debug, Default)]
pub struct UnavailableSender {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl TransactionalSender for UnavailableSender {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(IngestError::Transport("connection refused".to_string()))
    }
}

/// Broker whose sends hang, so files stay in flight until interrupted
#[derive(Debug, Default)]
pub struct StalledSender {
    pub queue: MemoryQueue,
    pub sends_started: Arc<AtomicUsize>,
}

#[async_trait]
impl TransactionalSender for StalledSender {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(StalledTransaction {
            inner: self.queue.begin().await?,
            sends_started: Arc::clone(&self.sends_started),
        }))
    }
}

struct StalledTransaction {
    inner: Box<dyn Transaction>,
    sends_started: Arc<AtomicUsize>,
}

#[async_trait]
impl Transaction for StalledTransaction {
    async fn send(&mut self, message: &str) -> Result<()> {
        self.sends_started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(600)).await;
        self.inner.send(message).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}
