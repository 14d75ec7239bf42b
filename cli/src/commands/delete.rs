//! `devmachine delete <id>`: release a machine's resources and forget it.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::output::json;

/// Arguments for the delete command.
#[derive(Args)]
pub struct DeleteArgs {
    /// Machine id (m-…)
    pub id: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Run `devmachine delete`.
///
/// # Errors
///
/// Returns an error if the machine does not exist or the prompt fails.
pub async fn run(app: &AppContext, args: &DeleteArgs) -> Result<()> {
    let orchestrator = app.orchestrator()?;
    let machine = match orchestrator.machine(&args.id).await {
        Ok(machine) => machine,
        Err(e) => return app.fail(&format!("{e:#}"), "machine_not_found"),
    };

    if !app.is_json() && !app.output.quiet {
        println!();
        println!("This will permanently remove {}:", machine.host_name);
        println!("  • Compute instance");
        if let Some(domain) = &machine.domain {
            println!("  • DNS record {domain}");
        }
        if machine.app_runtime.is_some() {
            println!("  • Backend project and its data");
        }
        println!();
    }

    if !args.yes && !app.confirm("Continue?", false)? {
        if !app.is_json() {
            println!("Cancelled.");
        }
        return Ok(());
    }

    let result = orchestrator.delete_machine(&args.id).await;
    if app.is_json() {
        json::print(&result)?;
    }
    if !result.success {
        anyhow::bail!("{}", result.error.as_deref().unwrap_or("delete failed"));
    }
    if !app.is_json() {
        app.output.success(&format!("Machine {} removed", args.id));
    }
    Ok(())
}
