//! Subcommands of the `dropq` binary

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::sender::{LogSender, RedisListSender, TransactionalSender};

pub mod check_config;
pub mod process;
pub mod run;

/// Redis when a broker URL is configured, the logging stub otherwise
pub async fn build_sender(config: &AppConfig) -> Result<Arc<dyn TransactionalSender>> {
    match &config.broker_url {
        Some(url) => {
            let sender = RedisListSender::connect(url, config.queue.clone())
                .await
                .context("Failed to connect to the message broker")?;
            Ok(Arc::new(sender))
        },
        None => {
            info!(queue = %config.queue, "No broker configured, messages are only logged");
            Ok(Arc::new(LogSender::new(config.queue.clone())))
        },
    }
}
