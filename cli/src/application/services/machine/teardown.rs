//! Teardown: three independent best-effort deletions.

use std::future::Future;

use anyhow::Result;
use devmachine_common::Machine;

use crate::application::ports::{
    BackendProjectProvisioner, ComputeProvisioner, Deletion, DnsProvisioner, MachineStore,
    Provisioners, TaskQueue,
};
use crate::domain::naming::subdomain_seed;
use crate::domain::{StepOutcome, WorkflowReport};

use super::Orchestrator;

pub const STEP_DELETE_DNS: &str = "delete-dns";
pub const STEP_DELETE_COMPUTE: &str = "delete-compute";
pub const STEP_DELETE_BACKEND: &str = "delete-backend";

impl<P: Provisioners, S: MachineStore, Q: TaskQueue> Orchestrator<P, S, Q> {
    /// Release every external resource, then remove the record.
    ///
    /// Cleanup failures are logged and reported, never returned as errors.
    ///
    /// # Errors
    ///
    /// Fails when the machine does not exist or the record cannot be removed.
    pub async fn delete(&self, machine_id: &str) -> Result<WorkflowReport> {
        let _guard = self.exclusive(machine_id).await?;
        let machine = self.load(machine_id).await?;

        tracing::info!(machine_id, state = %machine.state, "deleting machine");
        let report = self.release_resources(&machine).await;
        self.store.remove(machine_id).await?;
        if let Some(failures) = report.failure_summary() {
            tracing::warn!(machine_id, failures = %failures, "machine removed with leaked resources");
        } else {
            tracing::info!(machine_id, "machine deleted");
        }
        Ok(report)
    }

    /// Delete the DNS record, compute instance, and backend project.
    ///
    /// Each deletion runs regardless of the others. A resource whose
    /// identifying field was never persisted is skipped.
    pub(super) async fn release_resources(&self, machine: &Machine) -> WorkflowReport {
        let mut report = WorkflowReport::default();

        let seed = subdomain_seed(&machine.host_name);
        report.record(if machine.domain.is_some() {
            attempt(STEP_DELETE_DNS, &seed, self.providers.dns().delete_record(&seed)).await
        } else {
            StepOutcome::skipped(STEP_DELETE_DNS)
        });

        report.record(match machine.zone.as_deref() {
            Some(zone) => {
                let timeout = self.config.compute.operation_timeout();
                let delete = async {
                    tokio::time::timeout(timeout, self.providers.compute().delete(&machine.host_name, zone))
                        .await
                        .map_err(|_| anyhow::anyhow!("timed out after {}s", timeout.as_secs()))?
                };
                attempt(STEP_DELETE_COMPUTE, &machine.host_name, delete).await
            }
            None => StepOutcome::skipped(STEP_DELETE_COMPUTE),
        });

        report.record(match &machine.app_runtime {
            Some(runtime) => {
                let delete = self
                    .providers
                    .backend()
                    .delete_project(&runtime.backend_project_url, &runtime.backend_project_id);
                attempt(STEP_DELETE_BACKEND, &runtime.backend_project_id, delete).await
            }
            None => StepOutcome::skipped(STEP_DELETE_BACKEND),
        });

        report
    }
}

/// Run one deletion; not-found counts as success.
async fn attempt(
    step: &str,
    resource: &str,
    delete: impl Future<Output = Result<Deletion>>,
) -> StepOutcome {
    match delete.await {
        Ok(Deletion::Deleted) => {
            tracing::info!(step, resource, "released");
            StepOutcome::succeeded(step)
        }
        Ok(Deletion::NotFound) => {
            tracing::info!(step, resource, "already gone");
            StepOutcome::succeeded(step)
        }
        Err(e) => {
            tracing::warn!(step, resource, error = %format!("{e:#}"), "cleanup failed");
            StepOutcome::failed(step, format!("{e:#}"))
        }
    }
}
