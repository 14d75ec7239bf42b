//! Durable queue task payloads.

use chrono::{DateTime, Utc};
use devmachine_common::RepoInfo;
use serde::{Deserialize, Serialize};

use crate::domain::naming::{TASK_ID_PREFIX, generate_id};

/// Work item keyed by machine id.
///
/// Tasks carry only what cannot be read back from the machine record. The
/// repository credentials are never written to the machine itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineTask {
    pub id: String,
    pub machine_id: String,
    pub kind: TaskKind,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Phase A.
    ProvisionInfrastructure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo: Option<RepoInfo>,
    },
    /// Phase B.
    SetupApplication {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo: Option<RepoInfo>,
    },
}

impl TaskKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProvisionInfrastructure { .. } => "provision_infrastructure",
            Self::SetupApplication { .. } => "setup_application",
        }
    }
}

impl MachineTask {
    #[must_use]
    pub fn new(machine_id: &str, kind: TaskKind) -> Self {
        Self {
            id: generate_id(TASK_ID_PREFIX),
            machine_id: machine_id.to_string(),
            kind,
            enqueued_at: Utc::now(),
        }
    }
}
