//! Recursive directory watch feeding the stability tracker

use dashmap::DashSet;
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::stability::StabilityTracker;
use crate::error::Result;
use crate::layout;

/// Watches every non-reserved directory below `root`, one non-recursive
/// registration per directory, and hands candidate files to the tracker.
///
/// Archive folders are never registered, so moving a file into `.processed`
/// or `.error` never produces a new candidate.
pub struct DirectoryWatcher {
    root: PathBuf,
    extensions: Vec<String>,
    tracker: Arc<StabilityTracker>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    watched: DashSet<PathBuf>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        extensions: Vec<String>,
        tracker: Arc<StabilityTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            extensions,
            tracker,
            watcher: Mutex::new(None),
            watched: DashSet::new(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of directories currently registered
    pub fn watched_dirs(&self) -> usize {
        self.watched.len()
    }

    /// Register the tree, scan files already present, then follow events
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })?;
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);

        let this = Arc::clone(self);
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || this.register_tree(&root)).await?;

        info!(
            root = %self.root.display(),
            directories = self.watched.len(),
            tracked = self.tracker.len(),
            "Directory watcher started"
        );

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.event_loop(rx).await });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stop following events and release the OS watch
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Watcher event loop ended abnormally");
            }
        }
        self.watched.clear();
        info!(root = %self.root.display(), "Directory watcher stopped");
    }

    async fn event_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>) {
        loop {
            let res = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = rx.recv() => match res {
                    Some(res) => res,
                    None => break,
                },
            };

            match res {
                Ok(event) => self.handle_event(event).await,
                Err(e) => warn!(error = %e, "Watch error"),
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: notify::Event) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in event.paths {
                    if path.is_dir() {
                        if self.watched.contains(&path) || !self.is_watchable_dir(&path) {
                            continue;
                        }
                        let this = Arc::clone(self);
                        if let Err(e) =
                            tokio::task::spawn_blocking(move || this.register_tree(&path)).await
                        {
                            warn!(error = %e, "Directory registration task failed");
                        }
                    } else {
                        self.consider(&path);
                    }
                }
            },
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.watched.remove(path);
                }
            },
            _ => {},
        }

        if matches!(event.kind, EventKind::Modify(ModifyKind::Name(_))) {
            self.watched.retain(|dir| dir.exists());
        }
    }

    fn is_watchable_dir(&self, dir: &Path) -> bool {
        if dir == self.root {
            return true;
        }
        let own_name_reserved = dir.file_name().is_some_and(layout::is_reserved_dir_name);
        !own_name_reserved && !layout::in_reserved_dir(dir, &self.root)
    }

    /// Watch `dir` and every non-reserved directory below it, tracking the
    /// candidate files found along the way.
    ///
    /// Registration failures are per directory; the rest of the tree still
    /// gets watched.
    fn register_tree(&self, dir: &Path) {
        let walker = WalkDir::new(dir).follow_links(false).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !layout::is_reserved_dir_name(entry.file_name())
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable path");
                    continue;
                },
            };

            if entry.file_type().is_dir() {
                self.watch_dir(entry.path());
            } else if entry.file_type().is_file() {
                self.consider(entry.path());
            }
        }
    }

    fn watch_dir(&self, dir: &Path) {
        if self.watched.contains(dir) {
            return;
        }
        let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(watcher) = guard.as_mut() else {
            return;
        };

        match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                debug!(dir = %dir.display(), "Watching directory");
                self.watched.insert(dir.to_path_buf());
            },
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to watch directory"),
        }
    }

    fn consider(&self, path: &Path) {
        if layout::is_candidate(path, &self.root, &self.extensions) {
            self.tracker.track(path);
        }
    }
}
