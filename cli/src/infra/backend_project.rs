//! Managed backend platform adapter for the `BackendProjectProvisioner` port.
//!
//! Project lifecycle goes through the team management API with the platform
//! token. Environment variables are written to the deployment itself with the
//! per-project deploy key.

use anyhow::Result;
use devmachine_common::AppRuntime;
use serde::Deserialize;
use serde_json::json;

use crate::application::ports::{BackendProjectProvisioner, Deletion};
use crate::domain::config::BackendConfig;
use crate::infra::http;
use crate::infra::secrets::ProviderSecrets;

/// Name given to the deploy key minted for each project.
const DEPLOY_KEY_NAME: &str = "devmachine";

pub struct ManagedBackend {
    client: reqwest::Client,
    config: BackendConfig,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedProject {
    project_id: serde_json::Value,
    deployment_name: String,
    deployment_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedDeployKey {
    deploy_key: String,
}

/// Project ids come back as numbers from some API versions and strings from others.
fn project_id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn environment_changes(vars: &[(String, String)]) -> serde_json::Value {
    let changes: Vec<_> = vars
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    json!({ "changes": changes })
}

impl ManagedBackend {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: BackendConfig, token: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http::client(config.request_timeout())?,
            config,
            token,
        })
    }

    /// Fails with `MissingSecret` when `DEVMACHINE_BACKEND_TOKEN` is unset.
    fn token(&self) -> Result<&str> {
        Ok(ProviderSecrets::require(&self.token, "DEVMACHINE_BACKEND_TOKEN")?)
    }

    fn api(&self, path: &str) -> String {
        format!("{}/{path}", self.config.api_base.trim_end_matches('/'))
    }
}

impl BackendProjectProvisioner for ManagedBackend {
    async fn create_project(&self, name: &str) -> Result<AppRuntime> {
        let response = self
            .client
            .post(self.api(&format!("teams/{}/create_project", self.config.team_id)))
            .bearer_auth(self.token()?)
            .json(&json!({ "projectName": name, "deploymentType": "dev" }))
            .send()
            .await?;
        let project: CreatedProject = http::json(response, "creating backend project").await?;
        let Some(project_id) = project_id_string(&project.project_id) else {
            anyhow::bail!("creating backend project: response carried no project id");
        };

        let response = self
            .client
            .post(self.api(&format!(
                "deployments/{}/create_deploy_key",
                project.deployment_name
            )))
            .bearer_auth(self.token()?)
            .json(&json!({ "name": DEPLOY_KEY_NAME }))
            .send()
            .await?;
        let key: CreatedDeployKey = match http::json(response, "creating deploy key").await {
            Ok(key) => key,
            Err(e) => {
                // Without a key the project is unusable and nothing records it; remove it.
                if let Err(cleanup) = self.delete_project(&project.deployment_url, &project_id).await {
                    tracing::warn!(project_id = %project_id, error = %cleanup, "orphaned backend project");
                }
                return Err(e);
            }
        };

        tracing::info!(project_id = %project_id, url = %project.deployment_url, "backend project created");
        Ok(AppRuntime {
            backend_project_url: project.deployment_url,
            backend_project_id: project_id,
            backend_deploy_credential: key.deploy_key,
        })
    }

    async fn delete_project(&self, _url: &str, project_id: &str) -> Result<Deletion> {
        let response = self
            .client
            .post(self.api(&format!("projects/{project_id}/delete")))
            .bearer_auth(self.token()?)
            .send()
            .await?;
        if http::is_not_found(response.status()) {
            return Ok(Deletion::NotFound);
        }
        http::check(response, "deleting backend project").await?;
        Ok(Deletion::Deleted)
    }

    async fn set_environment(&self, runtime: &AppRuntime, vars: &[(String, String)]) -> Result<()> {
        let url = format!(
            "{}/api/update_environment_variables",
            runtime.backend_project_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Convex {}", runtime.backend_deploy_credential),
            )
            .json(&environment_changes(vars))
            .send()
            .await?;
        http::check(response, "setting backend environment").await?;
        Ok(())
    }
}
