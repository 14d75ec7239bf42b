//! Public machine operations.
//!
//! These never return `Err`: failures come back as `success: false` with a
//! message, and the persisted machine state stays authoritative.

use anyhow::{Context, Result};
use devmachine_common::{
    CreateMachineResult, DesiredState, Machine, OperationResult, RepoInfo, UpdateMachineResult,
};

use crate::application::ports::{MachineStore, Provisioners, TaskQueue};
use crate::domain::naming::{self, MACHINE_ID_PREFIX};
use crate::domain::recipe::authenticated_clone_url;
use crate::domain::{MachineError, MachineTask, TaskKind};

use super::Orchestrator;

impl<P: Provisioners, S: MachineStore, Q: TaskQueue> Orchestrator<P, S, Q> {
    /// Persist a new machine and enqueue Phase A.
    ///
    /// Returns as soon as the task is queued; progress is observed by polling
    /// the machine record.
    pub async fn create_machine(&self, owner_ref: &str, repo: Option<RepoInfo>) -> CreateMachineResult {
        match self.try_create_machine(owner_ref, repo).await {
            Ok(machine_id) => CreateMachineResult {
                success: true,
                error: None,
                machine_id: Some(machine_id),
            },
            Err(e) => {
                tracing::warn!(owner = owner_ref, error = %format!("{e:#}"), "create machine rejected");
                CreateMachineResult {
                    success: false,
                    error: Some(format!("{e:#}")),
                    machine_id: None,
                }
            }
        }
    }

    async fn try_create_machine(&self, owner_ref: &str, repo: Option<RepoInfo>) -> Result<String> {
        let host_name = naming::host_name(owner_ref)?;
        if let Some(repo) = &repo {
            authenticated_clone_url(&repo.clone_url, &repo.access_token)?;
        }

        // Serialise creates for the same owner so the 1:1 check holds.
        let _guard = self.exclusive(&format!("owner:{host_name}")).await?;
        let existing = self.store.list().await?;
        if existing
            .iter()
            .any(|m| m.owner_ref == owner_ref || m.host_name == host_name)
        {
            return Err(MachineError::AlreadyExists(owner_ref.to_string()).into());
        }

        let machine_id = naming::generate_id(MACHINE_ID_PREFIX);
        let machine = Machine::new(machine_id.clone(), owner_ref.to_string(), host_name);
        self.store.save(&machine).await?;

        let task = MachineTask::new(&machine_id, TaskKind::ProvisionInfrastructure { repo });
        if let Err(e) = self.queue.enqueue(&task).await {
            // Nothing external exists yet, so the record can simply go.
            if let Err(remove) = self.store.remove(&machine_id).await {
                tracing::error!(machine_id, error = %format!("{remove:#}"), "removing unqueued machine");
            }
            return Err(e).context("enqueueing infrastructure provisioning");
        }

        tracing::info!(machine_id, owner = owner_ref, "machine created; infrastructure queued");
        Ok(machine_id)
    }

    /// Suspend or resume a machine.
    pub async fn update_machine(&self, machine_id: &str, desired: DesiredState) -> UpdateMachineResult {
        if let Err(e) = naming::validate_machine_id(machine_id) {
            return UpdateMachineResult::failed(e.to_string());
        }
        match desired {
            DesiredState::Suspended => match self.suspend(machine_id).await {
                Ok(_) => UpdateMachineResult {
                    success: true,
                    ..UpdateMachineResult::default()
                },
                Err(e) => UpdateMachineResult::failed(format!("{e:#}")),
            },
            DesiredState::Running => match self.resume(machine_id).await {
                Ok(outcome) => UpdateMachineResult {
                    success: true,
                    error: outcome.report.failure_summary(),
                    degraded: outcome.is_degraded(),
                    ip_address: Some(outcome.ip_address),
                },
                Err(e) => UpdateMachineResult::failed(format!("{e:#}")),
            },
        }
    }

    /// Release all resources and remove the machine.
    pub async fn delete_machine(&self, machine_id: &str) -> OperationResult {
        if let Err(e) = naming::validate_machine_id(machine_id) {
            return OperationResult::failed(e.to_string());
        }
        match self.delete(machine_id).await {
            Ok(_) => OperationResult::ok(),
            Err(e) => OperationResult::failed(format!("{e:#}")),
        }
    }

    /// Load one machine.
    ///
    /// # Errors
    ///
    /// Returns `MachineError::InvalidId` or `MachineError::NotFound`.
    pub async fn machine(&self, machine_id: &str) -> Result<Machine> {
        naming::validate_machine_id(machine_id)?;
        self.load(machine_id).await
    }

    /// All machines, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list(&self) -> Result<Vec<Machine>> {
        let mut machines = self.store.list().await?;
        machines.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(machines)
    }
}
