//! Provisioning configuration schema and validation.
//!
//! Pure types only; loading from disk lives in `infra::config`. Every field
//! has a default so a partial YAML file is enough to get started; durations
//! are stored as whole seconds and exposed through `Duration` accessors.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;
use crate::domain::naming::is_valid_domain;

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration stored in `~/.devmachine/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Zones tried in order when creating a compute instance.
    pub zones: Vec<String>,
    /// Wait after an infrastructure change before the first shell attempt.
    pub settle_delay_secs: u64,
    pub ssh: SshConfig,
    pub compute: ComputeConfig,
    pub dns: DnsConfig,
    pub backend: BackendConfig,
    pub bootstrap: BootstrapConfig,
    /// Directory holding machine records and the task queue.
    /// Defaults to `~/.devmachine/state` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            zones: vec![
                "us-central1-a".to_string(),
                "us-central1-b".to_string(),
                "us-central1-c".to_string(),
                "us-central1-f".to_string(),
            ],
            settle_delay_secs: 30,
            ssh: SshConfig::default(),
            compute: ComputeConfig::default(),
            dns: DnsConfig::default(),
            backend: BackendConfig::default(),
            bootstrap: BootstrapConfig::default(),
            state_dir: None,
        }
    }
}

impl ProvisioningConfig {
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Reject configurations the orchestrator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones.is_empty() || self.zones.iter().any(|z| z.trim().is_empty()) {
            return Err(ConfigError::NoZones);
        }
        if self.ssh.connect_attempts == 0 {
            return Err(invalid("ssh.connect_attempts", "0"));
        }
        if self.ssh.connect_timeout_secs == 0 {
            return Err(invalid("ssh.connect_timeout_secs", "0"));
        }
        if !is_valid_domain(&self.dns.base_domain) {
            return Err(invalid("dns.base_domain", &self.dns.base_domain));
        }
        if self.bootstrap.app_port == 0 {
            return Err(invalid("bootstrap.app_port", "0"));
        }
        if !self.bootstrap.app_dir.starts_with('/') {
            return Err(invalid("bootstrap.app_dir", &self.bootstrap.app_dir));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Remote-shell connection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    /// Bounded number of connection attempts per phase.
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts.
    pub retry_delay_secs: u64,
    /// Timeout applied to each individual attempt.
    pub connect_timeout_secs: u64,
    /// Timeout applied to each remote command.
    pub command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "devmachine".to_string(),
            private_key_path: PathBuf::from("~/.devmachine/id_ed25519"),
            public_key_path: PathBuf::from("~/.devmachine/id_ed25519.pub"),
            connect_attempts: 10,
            retry_delay_secs: 15,
            connect_timeout_secs: 20,
            command_timeout_secs: 900,
        }
    }
}

impl SshConfig {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Compute provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub api_base: String,
    pub project: String,
    pub machine_type: String,
    pub image: String,
    pub disk_gb: u32,
    /// Timeout for create/start/stop/delete including operation polling.
    pub operation_timeout_secs: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            api_base: "https://compute.googleapis.com/compute/v1".to_string(),
            project: String::new(),
            machine_type: "e2-standard-4".to_string(),
            image: "projects/ubuntu-os-cloud/global/images/family/ubuntu-2404-lts-amd64"
                .to_string(),
            disk_gb: 50,
            operation_timeout_secs: 300,
        }
    }
}

impl ComputeConfig {
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// DNS provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub api_base: String,
    /// Parent domain machines are published under.
    pub base_domain: String,
    pub zone_id: String,
    pub ttl: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.cloudflare.com/client/v4".to_string(),
            base_domain: "dev.example.com".to_string(),
            zone_id: String::new(),
            ttl: 60,
        }
    }
}

/// Managed backend platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_base: String,
    pub team_id: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.convex.dev/v1".to_string(),
            team_id: String::new(),
            request_timeout_secs: 60,
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Host recipe parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub node_version: String,
    /// Absolute path the tenant repository is cloned into.
    pub app_dir: String,
    pub app_port: u16,
    /// npm package providing the coding-agent CLI.
    pub agent_package: String,
    /// Contact address for certificate registration.
    pub certificate_email: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            node_version: "22".to_string(),
            app_dir: "/home/devmachine/app".to_string(),
            app_port: 3000,
            agent_package: "@anthropic-ai/claude-code".to_string(),
            certificate_email: String::new(),
        }
    }
}
