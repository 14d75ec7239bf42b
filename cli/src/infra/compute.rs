//! Compute Engine REST adapter for the `ComputeProvisioner` port.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

use crate::application::ports::{ComputeProvisioner, Deletion, ProvisionedInstance};
use crate::domain::SshCredentials;
use crate::domain::config::ComputeConfig;
use crate::infra::http;
use crate::infra::secrets::ProviderSecrets;

/// Label attached to every instance this program creates.
const MANAGED_BY_LABEL: &str = "devmachine";

/// Compute Engine client bound to one project.
pub struct GceCompute {
    client: reqwest::Client,
    config: ComputeConfig,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: String,
    status: String,
    #[serde(default)]
    error: Option<OperationErrors>,
}

#[derive(Debug, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorItem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize)]
struct AccessConfig {
    #[serde(rename = "natIP", default)]
    nat_ip: Option<String>,
}

impl GceCompute {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ComputeConfig, token: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http::client(Duration::from_secs(150))?,
            config,
            token,
        })
    }

    /// Fails with `MissingSecret` when `DEVMACHINE_COMPUTE_TOKEN` is unset.
    fn token(&self) -> Result<&str> {
        Ok(ProviderSecrets::require(&self.token, "DEVMACHINE_COMPUTE_TOKEN")?)
    }

    fn zone_url(&self, zone: &str) -> String {
        format!(
            "{}/projects/{}/zones/{zone}",
            self.config.api_base.trim_end_matches('/'),
            self.config.project
        )
    }

    fn instance_url(&self, zone: &str, name: &str) -> String {
        format!("{}/instances/{name}", self.zone_url(zone))
    }

    /// Block until `op` is done or the operation timeout elapses.
    async fn wait(&self, zone: &str, mut op: Operation, what: &str) -> Result<()> {
        let deadline = Instant::now() + self.config.operation_timeout();
        while op.status != "DONE" {
            anyhow::ensure!(
                Instant::now() < deadline,
                "{what}: operation {} still {} after {}s",
                op.name,
                op.status,
                self.config.operation_timeout_secs
            );
            let url = format!("{}/operations/{}/wait", self.zone_url(zone), op.name);
            let response = self.client.post(&url).bearer_auth(self.token()?).send().await?;
            op = http::json(response, what).await?;
        }
        match operation_error(&op) {
            Some(message) => anyhow::bail!("{what}: {message}"),
            None => Ok(()),
        }
    }

    async fn external_ip(&self, zone: &str, name: &str) -> Result<String> {
        let response = self
            .client
            .get(self.instance_url(zone, name))
            .bearer_auth(self.token()?)
            .send()
            .await?;
        let instance: Instance = http::json(response, "reading instance").await?;
        external_ip(&instance).with_context(|| format!("instance {name} has no external address"))
    }

    async fn post_action(&self, zone: &str, name: &str, action: &str) -> Result<()> {
        let url = format!("{}/{action}", self.instance_url(zone, name));
        let response = self.client.post(&url).bearer_auth(self.token()?).send().await?;
        let op: Operation = http::json(response, action).await?;
        self.wait(zone, op, action).await
    }
}

/// Request body for `instances.insert`.
fn instance_body(
    config: &ComputeConfig,
    name: &str,
    zone: &str,
    user: &str,
    public_key: &str,
) -> serde_json::Value {
    json!({
        "name": name,
        "machineType": format!("zones/{zone}/machineTypes/{}", config.machine_type),
        "labels": { "managed-by": MANAGED_BY_LABEL },
        "disks": [{
            "boot": true,
            "autoDelete": true,
            "initializeParams": {
                "sourceImage": config.image,
                "diskSizeGb": config.disk_gb.to_string(),
            },
        }],
        "networkInterfaces": [{
            "network": "global/networks/default",
            "accessConfigs": [{ "type": "ONE_TO_ONE_NAT", "name": "External NAT" }],
        }],
        "metadata": {
            "items": [{ "key": "ssh-keys", "value": format!("{user}:{}", public_key.trim()) }],
        },
        "tags": { "items": ["http-server", "https-server"] },
    })
}

fn external_ip(instance: &Instance) -> Option<String> {
    instance
        .network_interfaces
        .iter()
        .flat_map(|n| n.access_configs.iter())
        .find_map(|a| a.nat_ip.clone())
}

fn operation_error(op: &Operation) -> Option<String> {
    let errors = &op.error.as_ref()?.errors;
    if errors.is_empty() {
        return None;
    }
    Some(
        errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

impl ComputeProvisioner for GceCompute {
    async fn create(
        &self,
        name: &str,
        zone: &str,
        credentials: &SshCredentials,
    ) -> Result<ProvisionedInstance> {
        let public_key = tokio::fs::read_to_string(&credentials.public_key_path)
            .await
            .with_context(|| format!("reading {}", credentials.public_key_path.display()))?;
        let body = instance_body(&self.config, name, zone, &credentials.user, &public_key);

        let response = self
            .client
            .post(format!("{}/instances", self.zone_url(zone)))
            .bearer_auth(self.token()?)
            .json(&body)
            .send()
            .await?;
        let op: Operation = http::json(response, "creating instance").await?;
        self.wait(zone, op, "creating instance").await?;

        let ip = self.external_ip(zone, name).await?;
        tracing::info!(instance = name, zone, ip = %ip, "instance created");
        Ok(ProvisionedInstance {
            ip,
            credentials: credentials.clone(),
        })
    }

    async fn start(&self, name: &str, zone: &str) -> Result<String> {
        self.post_action(zone, name, "start").await?;
        self.external_ip(zone, name).await
    }

    async fn stop(&self, name: &str, zone: &str) -> Result<()> {
        self.post_action(zone, name, "stop").await
    }

    async fn delete(&self, name: &str, zone: &str) -> Result<Deletion> {
        let response = self
            .client
            .delete(self.instance_url(zone, name))
            .bearer_auth(self.token()?)
            .send()
            .await?;
        if http::is_not_found(response.status()) {
            return Ok(Deletion::NotFound);
        }
        let op: Operation = http::json(response, "deleting instance").await?;
        self.wait(zone, op, "deleting instance").await?;
        Ok(Deletion::Deleted)
    }
}
