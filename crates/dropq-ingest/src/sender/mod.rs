//! Transactional delivery to the downstream queue
//!
//! One transaction per file: every message of the file is sent inside it and
//! it is committed only when all of them were sent.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::Result;

pub mod log;
pub mod memory;
pub mod redis;

pub use self::log::LogSender;
pub use self::memory::MemoryQueue;
pub use self::redis::RedisListSender;

/// Opens independent transactions; implementations must allow several to be
/// open at once from different tasks.
#[async_trait]
pub trait TransactionalSender: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// An open transaction. Dropping it without commit discards everything sent.
#[async_trait]
pub trait Transaction: Send {
    async fn send(&mut self, message: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Send every message of `messages` in one transaction.
///
/// Commits when the stream ends cleanly. An `Err` item or a failed send rolls
/// back and returns that error; a failed rollback is only logged.
pub async fn send_batch<S>(sender: &dyn TransactionalSender, messages: S) -> Result<usize>
where
    S: Stream<Item = Result<String>> + Send,
{
    let mut tx = sender.begin().await?;

    match feed(tx.as_mut(), messages).await {
        Ok(sent) => {
            tx.commit().await?;
            debug!(messages = sent, "Transaction committed");
            Ok(sent)
        },
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            debug!(error = %e, "Transaction rolled back");
            Err(e)
        },
    }
}

async fn feed<S>(tx: &mut dyn Transaction, messages: S) -> Result<usize>
where
    S: Stream<Item = Result<String>> + Send,
{
    let mut messages = std::pin::pin!(messages);
    let mut sent = 0;
    while let Some(message) = messages.next().await {
        tx.send(&message?).await?;
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use futures::stream;

    fn messages(items: &[&str]) -> Vec<Result<String>> {
        items.iter().map(|s| Ok(s.to_string())).collect()
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let queue = MemoryQueue::new();
        let sent = send_batch(&queue, stream::iter(messages(&["a", "b", "c"])))
            .await
            .unwrap();

        assert_eq!(sent, 3);
        assert_eq!(queue.messages(), vec!["a", "b", "c"]);
        assert_eq!(queue.stats().committed, 1);
    }

    #[tokio::test]
    async fn test_rollback_on_send_failure() {
        let queue = MemoryQueue::new().fail_on_send(2);
        let err = send_batch(&queue, stream::iter(messages(&["a", "b", "c"])))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Transport(_)));
        assert!(queue.messages().is_empty());
        let stats = queue.stats();
        assert_eq!(stats.rolled_back, 1);
        assert_eq!(stats.committed, 0);
        assert_eq!(stats.send_attempts, 2);
    }

    #[tokio::test]
    async fn test_rollback_on_stream_error() {
        let queue = MemoryQueue::new();
        let items = vec![
            Ok("a".to_string()),
            Err(IngestError::Structure {
                record: 2,
                expected: 2,
                found: 1,
            }),
            Ok("c".to_string()),
        ];
        let err = send_batch(&queue, stream::iter(items)).await.unwrap_err();

        assert!(matches!(err, IngestError::Structure { record: 2, .. }));
        assert!(queue.messages().is_empty());
        assert_eq!(queue.stats().send_attempts, 1);
    }

    #[tokio::test]
    async fn test_commit_failure_propagates() {
        let queue = MemoryQueue::new().fail_on_commit();
        let err = send_batch(&queue, stream::iter(messages(&["a"])))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Transport(_)));
        assert!(queue.messages().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_commits() {
        let queue = MemoryQueue::new();
        let sent = send_batch(&queue, stream::iter(messages(&[]))).await.unwrap();
        assert_eq!(sent, 0);
        assert_eq!(queue.stats().committed, 1);
    }
}
