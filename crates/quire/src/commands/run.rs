//! Running tasks.

use std::sync::Arc;

use anyhow::Result;
use quire_tasks::{format_elapsed, TaskRunner};

use crate::tasks::Session;

/// Run `tasks` in order, then keep serving until Ctrl-C if any task left a
/// server or watcher running.
pub async fn run(runner: &TaskRunner, session: &Arc<Session>, tasks: &[String]) -> Result<()> {
    let start = std::time::Instant::now();

    runner.run_sequence(tasks).await?;

    tracing::debug!("Tasks finished after {}", format_elapsed(start.elapsed()));

    if session.is_serving() {
        tracing::info!("Serving {}. Press Ctrl-C to stop.", session.preview.url());
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
    }

    Ok(())
}
