//! `devmachine status <id>` and `devmachine list`.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::output::{json, machine_row};

/// Arguments for the status command.
#[derive(Args)]
pub struct StatusArgs {
    /// Machine id (m-…)
    pub id: String,
}

/// Run `devmachine status`.
///
/// # Errors
///
/// Returns an error if the id is invalid or no such machine exists.
pub async fn run(app: &AppContext, args: &StatusArgs) -> Result<()> {
    let orchestrator = app.orchestrator()?;
    let machine = match orchestrator.machine(&args.id).await {
        Ok(machine) => machine,
        Err(e) => return app.fail(&format!("{e:#}"), "machine_not_found"),
    };
    if app.is_json() {
        json::print(&machine)
    } else {
        app.output.machine(&machine);
        Ok(())
    }
}

/// Run `devmachine list`.
///
/// # Errors
///
/// Returns an error if the machine store cannot be read.
pub async fn list(app: &AppContext) -> Result<()> {
    let machines = app.orchestrator()?.list().await?;
    if app.is_json() {
        return json::print(&machines);
    }
    if machines.is_empty() {
        app.output.info("No machines.");
        return Ok(());
    }
    for machine in &machines {
        println!("{}", machine_row(machine));
    }
    Ok(())
}
