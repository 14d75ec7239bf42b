use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a machine.
///
/// Creation walks `CreatingInfrastructure → InfrastructureReady →
/// SettingUpApplication → Running`; `Running ⇄ Suspended` is the only
/// bidirectional edge and `Failed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    CreatingInfrastructure,
    InfrastructureReady,
    SettingUpApplication,
    Running,
    Suspended,
    Failed,
}

impl MachineState {
    pub const ALL: [MachineState; 6] = [
        MachineState::CreatingInfrastructure,
        MachineState::InfrastructureReady,
        MachineState::SettingUpApplication,
        MachineState::Running,
        MachineState::Suspended,
        MachineState::Failed,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatingInfrastructure => "creating_infrastructure",
            Self::InfrastructureReady => "infrastructure_ready",
            Self::SettingUpApplication => "setting_up_application",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        }
    }

    /// True while the creation pipeline still owns the machine.
    #[must_use]
    pub fn is_creating(self) -> bool {
        matches!(
            self,
            Self::CreatingInfrastructure | Self::InfrastructureReady | Self::SettingUpApplication
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Failed
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown machine state '{0}'")]
pub struct ParseStateError(pub String);

impl FromStr for MachineState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

/// Connection details of the managed backend project paired with a machine.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppRuntime {
    pub backend_project_url: String,
    pub backend_project_id: String,
    pub backend_deploy_credential: String,
}

impl fmt::Debug for AppRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppRuntime")
            .field("backend_project_url", &self.backend_project_url)
            .field("backend_project_id", &self.backend_project_id)
            .field("backend_deploy_credential", &"<redacted>")
            .finish()
    }
}

/// Application-level health, orthogonal to the lifecycle state.
///
/// A resumed machine whose VM came back but whose application could not be
/// restarted stays `Running` with `Degraded` health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MachineHealth {
    #[default]
    Healthy,
    Degraded {
        reason: String,
    },
}

impl MachineHealth {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Repository coordinates supplied by the repository host.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    pub clone_url: String,
    pub access_token: String,
}

impl fmt::Debug for RepoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoInfo")
            .field("clone_url", &self.clone_url)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// One tenant's remote development environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    pub owner_ref: String,
    /// Stable name used for the compute instance and DNS naming.
    pub host_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub state: MachineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_runtime: Option<AppRuntime>,
    #[serde(default)]
    pub health: MachineHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Machine {
    /// A fresh record that has not touched any external system yet.
    #[must_use]
    pub fn new(id: String, owner_ref: String, host_name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_ref,
            host_name,
            zone: None,
            state: MachineState::CreatingInfrastructure,
            ip_address: None,
            domain: None,
            app_runtime: None,
            health: MachineHealth::Healthy,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
