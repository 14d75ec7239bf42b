//! System Bootstrapper: bare image → host able to run the application.

use anyhow::{Context, Result};

use crate::application::ports::RemoteSession;
use crate::application::services::connect::{run_best_effort, run_required};
use crate::domain::config::BootstrapConfig;
use crate::domain::recipe::system_setup_steps;
use crate::domain::{StepOutcome, WorkflowReport};

/// Run every system setup step in order.
///
/// # Errors
///
/// Returns the first failing required step. Optional steps are recorded in
/// the report and never fail the bootstrap.
pub async fn bootstrap_system(
    session: &impl RemoteSession,
    cfg: &BootstrapConfig,
    user: &str,
) -> Result<WorkflowReport> {
    let mut report = WorkflowReport::default();
    for step in system_setup_steps(cfg, user) {
        tracing::info!(step = step.name, "system bootstrap step");
        if step.required {
            run_required(session, step.name, &step.script)
                .await
                .with_context(|| format!("system bootstrap step '{}'", step.name))?;
            report.record(StepOutcome::succeeded(step.name));
        } else {
            report.record(run_best_effort(session, step.name, &step.script).await);
        }
    }
    Ok(report)
}
