//! `devmachine worker`: process queued provisioning tasks.

use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::TaskQueue;
use crate::application::services::Worker;
use crate::output::json;

/// Arguments for the worker command.
#[derive(Args)]
pub struct WorkerArgs {
    /// Drain the queue once and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between polls of an empty queue
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Tasks claimed per batch; tasks for different machines run concurrently
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u64).range(1..=64))]
    pub batch_size: u64,
}

/// Run `devmachine worker`.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub async fn run(app: &AppContext, args: &WorkerArgs) -> Result<()> {
    let orchestrator = app.orchestrator()?;
    let batch_size = usize::try_from(args.batch_size)?;
    let worker = Worker::new(&orchestrator, batch_size);

    if !args.once {
        app.output.info("Worker started. Press Ctrl-C to stop.");
        return worker.run(Duration::from_secs(args.poll_interval)).await;
    }

    let recovered = orchestrator.queue().recover().await?;
    let summary = worker.drain().await?;
    if app.is_json() {
        return json::print(&summary);
    }
    if recovered > 0 {
        app.output.info(&format!("Requeued {recovered} interrupted task(s)"));
    }
    app.output.success(&format!(
        "Processed {} task(s): {} completed, {} failed, {} dropped, {} deferred",
        summary.total(),
        summary.completed,
        summary.failed,
        summary.dropped,
        summary.deferred
    ));
    Ok(())
}
