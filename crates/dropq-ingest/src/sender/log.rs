//! Stub sender that only logs, for running without a broker

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Transaction, TransactionalSender};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct LogSender {
    queue: String,
}

impl LogSender {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl TransactionalSender for LogSender {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(LogTransaction {
            queue: self.queue.clone(),
            sent: 0,
        }))
    }
}

struct LogTransaction {
    queue: String,
    sent: usize,
}

#[async_trait]
impl Transaction for LogTransaction {
    async fn send(&mut self, message: &str) -> Result<()> {
        self.sent += 1;
        debug!(queue = %self.queue, seq = self.sent, message, "Stub send");
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        info!(queue = %self.queue, messages = self.sent, "Stub commit");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        warn!(queue = %self.queue, messages = self.sent, "Stub rollback");
        Ok(())
    }
}
