//! Quiescence detection for files that are still being written

use dashmap::DashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Last observed state of a candidate file
#[derive(Debug, Clone)]
pub struct WatchedFile {
    pub first_seen: Instant,
    pub last_size: u64,
    pub last_modified: Option<SystemTime>,
    pub last_change: Instant,
}

/// What one tick decided
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub ready: Vec<PathBuf>,
    pub abandoned: Vec<PathBuf>,
    pub gone: Vec<PathBuf>,
}

/// Tracks candidate files until they stop changing.
///
/// A file is promoted once its size and mtime have been unchanged for
/// `threshold` and it can be opened for reading; it is abandoned once it has
/// been tracked for longer than `max_wait`. Promotion removes the entry before
/// sending it on `ready`, so a file is dispatched at most once per sighting.
#[derive(Debug)]
pub struct StabilityTracker {
    files: DashMap<PathBuf, WatchedFile>,
    threshold: Duration,
    max_wait: Duration,
    ready: mpsc::UnboundedSender<PathBuf>,
}

impl StabilityTracker {
    pub fn new(
        threshold: Duration,
        max_wait: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PathBuf>) {
        let (ready, rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(Self {
            files: DashMap::new(),
            threshold,
            max_wait,
            ready,
        });
        (tracker, rx)
    }

    /// Start tracking `path` unless already tracked. Non-files are ignored.
    pub fn track(&self, path: &Path) {
        self.track_at(path, Instant::now());
    }

    pub fn track_at(&self, path: &Path, now: Instant) {
        if self.files.contains_key(path) {
            return;
        }
        let Ok(meta) = std::fs::metadata(path) else {
            return;
        };
        if !meta.is_file() {
            return;
        }

        self.files.entry(path.to_path_buf()).or_insert_with(|| {
            debug!(path = %path.display(), size = meta.len(), "Tracking file");
            WatchedFile {
                first_seen: now,
                last_size: meta.len(),
                last_modified: meta.modified().ok(),
                last_change: now,
            }
        });
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Re-examine every tracked file and dispatch the ready ones
    pub fn tick(&self, now: Instant) -> TickSummary {
        let mut summary = TickSummary::default();

        self.files.retain(|path, file| {
            let Ok(meta) = std::fs::metadata(path) else {
                summary.gone.push(path.clone());
                return false;
            };

            let size = meta.len();
            let modified = meta.modified().ok();
            if size != file.last_size || modified != file.last_modified {
                file.last_size = size;
                file.last_modified = modified;
                file.last_change = now;
            } else if now.saturating_duration_since(file.last_change) >= self.threshold
                && File::open(path).is_ok()
            {
                summary.ready.push(path.clone());
                return false;
            }

            if now.saturating_duration_since(file.first_seen) > self.max_wait {
                summary.abandoned.push(path.clone());
                return false;
            }
            true
        });

        for path in &summary.gone {
            debug!(path = %path.display(), "Tracked file disappeared");
        }
        for path in &summary.abandoned {
            warn!(
                path = %path.display(),
                max_wait_ms = self.max_wait.as_millis() as u64,
                "File never became stable, abandoning"
            );
        }
        for path in &summary.ready {
            debug!(path = %path.display(), "File is stable");
            if self.ready.send(path.clone()).is_err() {
                warn!(path = %path.display(), "Dispatch closed, dropping ready file");
            }
        }

        summary
    }

    /// Tick every `interval` until cancelled
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "Stability tracker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                }
            }
        }

        info!(pending = self.files.len(), "Stability tracker stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    const THRESHOLD: Duration = Duration::from_secs(2);
    const MAX_WAIT: Duration = Duration::from_secs(10);

    fn tracker() -> (Arc<StabilityTracker>, mpsc::UnboundedReceiver<PathBuf>) {
        StabilityTracker::new(THRESHOLD, MAX_WAIT)
    }

    #[test]
    fn test_stable_file_dispatched_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "1,2\n").unwrap();

        let (tracker, mut rx) = tracker();
        let t0 = Instant::now();
        tracker.track_at(&path, t0);
        tracker.track_at(&path, t0);
        assert_eq!(tracker.len(), 1);

        assert!(tracker.tick(t0 + Duration::from_secs(1)).ready.is_empty());

        let summary = tracker.tick(t0 + THRESHOLD);
        assert_eq!(summary.ready, vec![path.clone()]);
        assert!(!tracker.is_tracked(&path));
        assert_eq!(rx.try_recv().unwrap(), path);

        assert!(tracker.tick(t0 + THRESHOLD * 2).ready.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_growth_resets_quiet_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "1").unwrap();

        let (tracker, _rx) = tracker();
        let t0 = Instant::now();
        tracker.track_at(&path, t0);

        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b",2\n")
            .unwrap();

        let t1 = t0 + Duration::from_secs(3);
        assert!(tracker.tick(t1).ready.is_empty());
        assert!(tracker.tick(t1 + Duration::from_secs(1)).ready.is_empty());
        assert_eq!(tracker.tick(t1 + THRESHOLD).ready, vec![path]);
    }

    #[test]
    fn test_never_stable_file_is_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.csv");
        std::fs::write(&path, "x").unwrap();

        let (tracker, mut rx) = tracker();
        let t0 = Instant::now();
        tracker.track_at(&path, t0);

        let mut abandoned = Vec::new();
        for step in 1..=12u64 {
            std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap()
                .write_all(b"x")
                .unwrap();
            let summary = tracker.tick(t0 + Duration::from_secs(step));
            assert!(summary.ready.is_empty());
            abandoned.extend(summary.abandoned);
        }

        assert_eq!(abandoned, vec![path]);
        assert!(tracker.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_deleted_file_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.csv");
        std::fs::write(&path, "1").unwrap();

        let (tracker, mut rx) = tracker();
        let t0 = Instant::now();
        tracker.track_at(&path, t0);
        std::fs::remove_file(&path).unwrap();

        let summary = tracker.tick(t0 + THRESHOLD);
        assert_eq!(summary.gone, vec![path]);
        assert!(tracker.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_directories_and_missing_paths_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, _rx) = tracker();
        tracker.track(dir.path());
        tracker.track(&dir.path().join("missing.csv"));
        assert!(tracker.is_empty());
    }
}
