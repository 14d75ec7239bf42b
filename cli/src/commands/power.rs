//! `devmachine suspend|resume <id>`: change a machine's desired power state.

use anyhow::Result;
use clap::Args;
use devmachine_common::DesiredState;

use crate::app::AppContext;
use crate::output::json;

/// Arguments for suspend and resume.
#[derive(Args)]
pub struct PowerArgs {
    /// Machine id (m-…)
    pub id: String,
}

/// Run `devmachine suspend` or `devmachine resume`.
///
/// # Errors
///
/// Returns an error if the transition was rejected or the compute action
/// failed. A degraded resume is reported but is not an error.
pub async fn run(app: &AppContext, args: &PowerArgs, desired: DesiredState) -> Result<()> {
    let orchestrator = app.orchestrator()?;
    let result = orchestrator.update_machine(&args.id, desired).await;

    if app.is_json() {
        json::print(&result)?;
    }
    if !result.success {
        anyhow::bail!(
            "{}",
            result.error.as_deref().unwrap_or("update failed")
        );
    }
    if app.is_json() {
        return Ok(());
    }

    match desired {
        DesiredState::Suspended => app.output.success(&format!("Machine {} suspended", args.id)),
        DesiredState::Running => {
            app.output.success(&format!("Machine {} running", args.id));
            if let Some(ip) = &result.ip_address {
                app.output.kv("ip", ip);
            }
            if result.degraded {
                app.output.warn(&format!(
                    "Application restart incomplete: {}",
                    result.error.as_deref().unwrap_or("unknown")
                ));
            }
        }
    }
    Ok(())
}
