//! Redis list adapter: `MULTI` / `RPUSH` / `EXEC`
//!
//! Every transaction runs on its own connection so concurrent files never
//! interleave inside one `MULTI` block. A dropped transaction closes its
//! connection, which makes the server discard the queued commands.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::fmt;
use tracing::{debug, info};

use super::{Transaction, TransactionalSender};
use crate::error::{IngestError, Result};

#[derive(Clone)]
pub struct RedisListSender {
    client: redis::Client,
    queue: String,
}

impl fmt::Debug for RedisListSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisListSender")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl RedisListSender {
    /// Open a client and check the broker answers
    pub async fn connect(url: &str, queue: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        let queue = queue.into();
        info!(queue = %queue, "Connected to Redis broker");
        Ok(Self { client, queue })
    }
}

#[async_trait]
impl TransactionalSender for RedisListSender {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("MULTI").query_async::<()>(&mut conn).await?;
        Ok(Box::new(RedisTransaction {
            conn,
            queue: self.queue.clone(),
            queued: 0,
        }))
    }
}

struct RedisTransaction {
    conn: MultiplexedConnection,
    queue: String,
    queued: usize,
}

#[async_trait]
impl Transaction for RedisTransaction {
    async fn send(&mut self, message: &str) -> Result<()> {
        redis::cmd("RPUSH")
            .arg(&self.queue)
            .arg(message)
            .query_async::<()>(&mut self.conn)
            .await?;
        self.queued += 1;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let reply: redis::Value = redis::cmd("EXEC").query_async(&mut self.conn).await?;
        if matches!(reply, redis::Value::Nil) {
            return Err(IngestError::Transport("EXEC aborted by the server".to_string()));
        }
        debug!(queue = %self.queue, messages = self.queued, "EXEC");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        redis::cmd("DISCARD").query_async::<()>(&mut self.conn).await?;
        debug!(queue = %self.queue, discarded = self.queued, "DISCARD");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sender::send_batch;
    use futures::stream;

    // These need a reachable Redis; set REDIS_URL to point elsewhere than
    // localhost and run with `cargo test -- --ignored`.

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
    }

    /// Sender on a queue key private to this test, emptied first
    async fn sender(name: &str) -> (RedisListSender, MultiplexedConnection) {
        let queue = format!("dropq:test:{name}:{}", std::process::id());
        let sender = RedisListSender::connect(&redis_url(), queue.clone())
            .await
            .expect("Failed to connect to Redis");
        let mut conn = sender.client.get_multiplexed_async_connection().await.unwrap();
        redis::cmd("DEL").arg(&queue).query_async::<()>(&mut conn).await.unwrap();
        (sender, conn)
    }

    async fn queued(conn: &mut MultiplexedConnection, queue: &str) -> Vec<String> {
        redis::cmd("LRANGE")
            .arg(queue)
            .arg(0)
            .arg(-1)
            .query_async(conn)
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn test_commit_pushes_batch_in_order() {
        let (sender, mut conn) = sender("commit").await;
        let messages = vec![
            Ok("T,T/I/PROCESS,U/P,1".to_string()),
            Ok("T,T/I/PROCESS,U/P,2".to_string()),
        ];

        let sent = send_batch(&sender, stream::iter(messages)).await.unwrap();

        assert_eq!(sent, 2);
        assert_eq!(
            queued(&mut conn, &sender.queue).await,
            vec!["T,T/I/PROCESS,U/P,1", "T,T/I/PROCESS,U/P,2"]
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn test_failed_batch_is_discarded() {
        let (sender, mut conn) = sender("rollback").await;
        let messages = vec![
            Ok("first".to_string()),
            Err(IngestError::Transport("upstream broke".to_string())),
        ];

        let err = send_batch(&sender, stream::iter(messages)).await.unwrap_err();

        assert!(matches!(err, IngestError::Transport(_)));
        assert!(queued(&mut conn, &sender.queue).await.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn test_dropped_transaction_leaves_queue_untouched() {
        let (sender, mut conn) = sender("dropped").await;

        let mut tx = sender.begin().await.unwrap();
        tx.send("never delivered").await.unwrap();
        drop(tx);

        let mut other = sender.begin().await.unwrap();
        other.send("delivered").await.unwrap();
        other.commit().await.unwrap();

        assert_eq!(queued(&mut conn, &sender.queue).await, vec!["delivered"]);
    }
}
