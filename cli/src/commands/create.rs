//! `devmachine create <owner>`: register a machine and queue its provisioning.

use anyhow::Result;
use clap::Args;
use devmachine_common::RepoInfo;

use crate::app::AppContext;
use crate::output::json;

/// Arguments for the create command.
#[derive(Args)]
pub struct CreateArgs {
    /// Tenant the machine belongs to (one machine per owner)
    pub owner: String,

    /// HTTPS clone URL of the tenant's repository
    #[arg(long)]
    pub repo: Option<String>,

    /// Access token for the repository
    #[arg(long, env = "DEVMACHINE_REPO_TOKEN", hide_env_values = true)]
    pub repo_token: Option<String>,
}

impl CreateArgs {
    fn repo_info(&self) -> Result<Option<RepoInfo>> {
        match (&self.repo, &self.repo_token) {
            (None, _) => Ok(None),
            (Some(url), Some(token)) => Ok(Some(RepoInfo {
                clone_url: url.clone(),
                access_token: token.clone(),
            })),
            (Some(_), None) => {
                anyhow::bail!("--repo requires --repo-token or DEVMACHINE_REPO_TOKEN")
            }
        }
    }
}

/// Run `devmachine create`.
///
/// # Errors
///
/// Returns an error if the machine could not be registered.
pub async fn run(app: &AppContext, args: &CreateArgs) -> Result<()> {
    let repo = args.repo_info()?;
    let orchestrator = app.orchestrator()?;
    let result = orchestrator.create_machine(&args.owner, repo).await;

    if app.is_json() {
        json::print(&result)?;
    }
    match (&result.machine_id, &result.error) {
        (Some(id), _) if result.success => {
            if !app.is_json() {
                app.output.success(&format!("Machine {id} created"));
                app.output.info("Provisioning is queued. Process it with: devmachine worker");
            }
            Ok(())
        }
        (_, error) => anyhow::bail!(
            "{}",
            error.as_deref().unwrap_or("machine could not be created")
        ),
    }
}
