//! Ephemeral context handed between creation phases.

use std::path::PathBuf;

use devmachine_common::Machine;

use crate::domain::error::ProvisionError;

/// Credentials used to open a remote shell on a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshCredentials {
    pub user: String,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
}

/// Reachable host plus everything a phase needs to talk to it.
///
/// Never persisted. Phase B rebuilds it from the machine record.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub ip: String,
    pub credentials: SshCredentials,
    pub domain: String,
    pub zone: String,
}

impl PhaseContext {
    /// Rebuild the context from a persisted machine.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::MissingField` when zone, IP, or domain is absent.
    pub fn from_machine(
        machine: &Machine,
        credentials: &SshCredentials,
    ) -> Result<Self, ProvisionError> {
        let missing = |field| ProvisionError::MissingField {
            id: machine.id.clone(),
            field,
        };
        Ok(Self {
            ip: machine.ip_address.clone().ok_or_else(|| missing("ip address"))?,
            domain: machine.domain.clone().ok_or_else(|| missing("domain"))?,
            zone: machine.zone.clone().ok_or_else(|| missing("zone"))?,
            credentials: credentials.clone(),
        })
    }
}
