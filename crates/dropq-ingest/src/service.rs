//! Long-running ingestion service: watcher, stability timer, worker pool

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::orchestrator::{Orchestrator, StatsSnapshot};
use crate::sender::TransactionalSender;
use crate::transform::TransformRegistry;
use crate::watcher::{DirectoryWatcher, StabilityTracker};

/// Point-in-time view of a running service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub running: bool,
    pub tracked_files: usize,
    pub watched_dirs: usize,
    pub in_flight: usize,
    pub known_hashes: usize,
    pub stats: StatsSnapshot,
}

pub struct IngestService {
    config: Arc<AppConfig>,
    orchestrator: Arc<Orchestrator>,
    tracker: Arc<StabilityTracker>,
    watcher: Arc<DirectoryWatcher>,
    /// Timer and dispatch loop
    tasks: TaskTracker,
    workers: TaskTracker,
    in_flight: Arc<InFlight>,
    /// Stops discovery and dispatch
    shutdown: CancellationToken,
    /// Interrupts files still being processed
    abort: CancellationToken,
    running: AtomicBool,
}

impl IngestService {
    /// Create the root, load the hash index, then start watching and dispatching
    pub async fn start(
        config: AppConfig,
        sender: Arc<dyn TransactionalSender>,
        registry: Arc<TransformRegistry>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.root_dir).await?;
        let config = Arc::new(config);
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&config), sender, registry)?);

        let (tracker, ready) =
            StabilityTracker::new(config.stability_threshold(), config.max_file_wait());
        let watcher = DirectoryWatcher::new(
            config.root_dir.clone(),
            config.supported_extensions.clone(),
            Arc::clone(&tracker),
        );

        let service = Self {
            config: Arc::clone(&config),
            orchestrator,
            tracker,
            watcher,
            tasks: TaskTracker::new(),
            workers: TaskTracker::new(),
            in_flight: Arc::new(InFlight::default()),
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            running: AtomicBool::new(true),
        };

        service.tasks.spawn(
            Arc::clone(&service.tracker).run(config.scan_interval(), service.shutdown.clone()),
        );
        service.tasks.spawn(dispatch(
            ready,
            Arc::clone(&service.orchestrator),
            Arc::clone(&service.tracker),
            Arc::new(Semaphore::new(config.workers)),
            service.workers.clone(),
            Arc::clone(&service.in_flight),
            service.shutdown.clone(),
            service.abort.clone(),
        ));

        if let Err(e) = service.watcher.start().await {
            service.stop().await;
            return Err(e);
        }

        info!(
            root = %config.root_dir.display(),
            workers = config.workers,
            extensions = ?config.supported_extensions,
            "Ingestion service started"
        );
        Ok(service)
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn health(&self) -> Health {
        Health {
            running: self.running.load(Ordering::SeqCst),
            tracked_files: self.tracker.len(),
            watched_dirs: self.watcher.watched_dirs(),
            in_flight: self.in_flight.len(),
            known_hashes: self.orchestrator.hash_index().len(),
            stats: self.orchestrator.stats(),
        }
    }

    /// Stop watching, drain in-flight files for the grace period, then
    /// interrupt the rest. Interrupted files stay where they are.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping ingestion service");

        self.watcher.stop().await;
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        self.workers.close();
        let grace = self.config.shutdown_grace();
        if tokio::time::timeout(grace, self.workers.wait()).await.is_err() {
            warn!(
                in_flight = self.workers.len(),
                grace_secs = grace.as_secs(),
                "Grace period elapsed, interrupting in-flight files"
            );
            self.abort.cancel();
            self.workers.wait().await;
        }

        let stats = self.orchestrator.stats();
        info!(
            delivered = stats.delivered,
            duplicates = stats.duplicates,
            failed = stats.failed,
            messages = stats.messages,
            "Ingestion service stopped"
        );
    }
}

/// Paths being processed. A path promoted again while its previous drop is
/// still running is deferred and handed back to the stability tracker once
/// that run finishes.
#[derive(Debug, Default)]
struct InFlight {
    /// path -> promoted again meanwhile
    paths: DashMap<PathBuf, bool>,
}

impl InFlight {
    /// Claim `path`; false (and deferred) when it is already claimed
    fn begin(&self, path: &Path) -> bool {
        match self.paths.entry(path.to_path_buf()) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() = true;
                false
            },
            Entry::Vacant(entry) => {
                entry.insert(false);
                true
            },
        }
    }

    /// Drop a claim that never started processing
    fn forget(&self, path: &Path) {
        self.paths.remove(path);
    }

    fn release(&self, path: &Path, tracker: &StabilityTracker) {
        if let Some((_, true)) = self.paths.remove(path) {
            debug!(path = %path.display(), "Re-tracking file promoted while in flight");
            tracker.track(path);
        }
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Hand ready files to the worker pool, at most `permits` at a time
async fn dispatch(
    mut ready: mpsc::UnboundedReceiver<PathBuf>,
    orchestrator: Arc<Orchestrator>,
    tracker: Arc<StabilityTracker>,
    permits: Arc<Semaphore>,
    workers: TaskTracker,
    in_flight: Arc<InFlight>,
    shutdown: CancellationToken,
    abort: CancellationToken,
) {
    loop {
        let path = tokio::select! {
            _ = shutdown.cancelled() => break,
            path = ready.recv() => match path {
                Some(path) => path,
                None => break,
            },
        };

        if !in_flight.begin(&path) {
            debug!(path = %path.display(), "Already being processed, deferred");
            continue;
        }

        let permit = tokio::select! {
            _ = shutdown.cancelled() => {
                in_flight.forget(&path);
                break;
            },
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let orchestrator = Arc::clone(&orchestrator);
        let in_flight = Arc::clone(&in_flight);
        let tracker = Arc::clone(&tracker);
        let abort = abort.clone();
        workers.spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = abort.cancelled() => {
                    warn!(path = %path.display(), "Interrupted by shutdown, file left in place");
                },
                _ = orchestrator.process_file(&path) => {},
            }
            in_flight.release(&path, &tracker);
        });
    }

    debug!("Dispatch loop stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_in_flight_claims_once() {
        let in_flight = InFlight::default();
        let path = Path::new("/drops/a.csv");

        assert!(in_flight.begin(path));
        assert!(!in_flight.begin(path));
        assert_eq!(in_flight.len(), 1);

        in_flight.forget(path);
        assert_eq!(in_flight.len(), 0);
        assert!(in_flight.begin(path));
    }

    #[test]
    fn test_deferred_promotion_is_tracked_again() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, _ready) =
            StabilityTracker::new(Duration::from_secs(2), Duration::from_secs(10));
        let in_flight = InFlight::default();

        let first = dir.path().join("first.csv");
        std::fs::write(&first, "ID\n1\n").unwrap();
        assert!(in_flight.begin(&first));
        in_flight.release(&first, &tracker);
        assert!(!tracker.is_tracked(&first));

        let again = dir.path().join("again.csv");
        std::fs::write(&again, "ID\n2\n").unwrap();
        assert!(in_flight.begin(&again));
        assert!(!in_flight.begin(&again));
        in_flight.release(&again, &tracker);

        assert!(tracker.is_tracked(&again));
        assert_eq!(in_flight.len(), 0);
    }
}
