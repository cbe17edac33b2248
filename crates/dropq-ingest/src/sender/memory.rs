//! In-process queue, used for embedding and tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Transaction, TransactionalSender};
use crate::error::{IngestError, Result};

#[derive(Debug, Default)]
struct Shared {
    committed: Mutex<Vec<String>>,
    begun: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    send_attempts: AtomicUsize,
}

impl Shared {
    fn committed(&self) -> MutexGuard<'_, Vec<String>> {
        self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counters of a [`MemoryQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryQueueStats {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub send_attempts: usize,
}

/// Messages become visible only when their transaction commits.
///
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
    fail_on_send: Option<usize>,
    fail_on_commit: bool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`-th send (1-based) of every transaction fail
    pub fn fail_on_send(mut self, n: usize) -> Self {
        self.fail_on_send = Some(n);
        self
    }

    pub fn fail_on_commit(mut self) -> Self {
        self.fail_on_commit = true;
        self
    }

    /// Committed messages in delivery order
    pub fn messages(&self) -> Vec<String> {
        self.shared.committed().clone()
    }

    pub fn stats(&self) -> MemoryQueueStats {
        MemoryQueueStats {
            begun: self.shared.begun.load(Ordering::SeqCst),
            committed: self.shared.commits.load(Ordering::SeqCst),
            rolled_back: self.shared.rollbacks.load(Ordering::SeqCst),
            send_attempts: self.shared.send_attempts.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl TransactionalSender for MemoryQueue {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.shared.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransaction {
            queue: self.clone(),
            pending: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    queue: MemoryQueue,
    pending: Vec<String>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn send(&mut self, message: &str) -> Result<()> {
        self.queue.shared.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.queue.fail_on_send == Some(self.pending.len() + 1) {
            return Err(IngestError::Transport(format!(
                "injected failure on message {}",
                self.pending.len() + 1
            )));
        }
        self.pending.push(message.to_string());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { queue, pending } = *self;
        if queue.fail_on_commit {
            return Err(IngestError::Transport("injected commit failure".to_string()));
        }
        queue.shared.committed().extend(pending);
        queue.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.queue.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
