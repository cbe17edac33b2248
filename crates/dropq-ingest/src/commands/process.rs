//! `dropq process <file>`

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::build_sender;
use crate::config::AppConfig;
use crate::orchestrator::{Orchestrator, ProcessOutcome};
use crate::transform::TransformRegistry;

/// Push one file through the same pipeline the service uses
pub async fn run(config: AppConfig, file: &Path) -> Result<ProcessOutcome> {
    let file = file
        .canonicalize()
        .with_context(|| format!("Cannot access {}", file.display()))?;

    let sender = build_sender(&config).await?;
    let orchestrator = Orchestrator::new(
        Arc::new(config),
        sender,
        Arc::new(TransformRegistry::with_builtins()),
    )
    .context("Failed to initialise the orchestrator")?;

    let outcome = orchestrator.process_file(&file).await;
    match &outcome {
        ProcessOutcome::Skipped => bail!("{} is not an ingestible file", file.display()),
        ProcessOutcome::Failed { kind, message, .. } => bail!("{kind} error: {message}"),
        _ => Ok(outcome),
    }
}
