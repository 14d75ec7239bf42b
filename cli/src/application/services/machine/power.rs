//! Suspend and resume.

use anyhow::{Context, Result};
use devmachine_common::{Machine, MachineState};

use crate::application::ports::{
    ComputeProvisioner, Deletion, DnsProvisioner, MachineStore, Provisioners, RemoteSession,
    TaskQueue,
};
use crate::application::services::connect::{RetryPolicy, connect_with_retry, run_best_effort};
use crate::domain::naming::subdomain_seed;
use crate::domain::recipe::{PROXY_RELOAD, SUPERVISOR_RESTART, SUPERVISOR_STOP};
use crate::domain::{ProvisionError, ResumeOutcome, StepOutcome, WorkflowReport, lifecycle};

use super::Orchestrator;

pub const STEP_SUPERVISOR_STOP: &str = "supervisor-stop";
pub const STEP_COMPUTE_STOP: &str = "compute-stop";
pub const STEP_DNS_DELETE: &str = "dns-delete";
pub const STEP_DNS_CREATE: &str = "dns-create";
pub const STEP_REMOTE_SHELL: &str = "remote-shell";
pub const STEP_PROXY_RELOAD: &str = "proxy-reload";
pub const STEP_SUPERVISOR_RESTART: &str = "supervisor-restart";

impl<P: Provisioners, S: MachineStore, Q: TaskQueue> Orchestrator<P, S, Q> {
    /// Stop a running machine. DNS is left untouched.
    ///
    /// # Errors
    ///
    /// Fails without side effects unless the machine is `running`; fails
    /// when the compute provider cannot stop the instance.
    pub async fn suspend(&self, machine_id: &str) -> Result<WorkflowReport> {
        let _guard = self.exclusive(machine_id).await?;
        let mut machine = self.load_in_state(machine_id, MachineState::Running).await?;
        let zone = zone_of(&machine)?;

        tracing::info!(machine_id, zone = %zone, "suspending machine");
        let mut report = WorkflowReport::default();
        report.record(self.stop_processes(&machine).await);

        let timeout = self.config.compute.operation_timeout();
        tokio::time::timeout(timeout, self.providers.compute().stop(&machine.host_name, &zone))
            .await
            .map_err(|_| anyhow::anyhow!("compute stop timed out after {}s", timeout.as_secs()))?
            .with_context(|| format!("stopping instance {} in {zone}", machine.host_name))?;
        report.record(StepOutcome::succeeded(STEP_COMPUTE_STOP));

        self.advance(&mut machine, MachineState::Suspended).await?;
        tracing::info!(machine_id, "machine suspended");
        Ok(report)
    }

    /// One connection attempt and a graceful supervisor stop; never fails.
    async fn stop_processes(&self, machine: &Machine) -> StepOutcome {
        let Some(ip) = machine.ip_address.as_deref() else {
            return StepOutcome::skipped(STEP_SUPERVISOR_STOP);
        };
        let policy = RetryPolicy::single(&self.config.ssh);
        match connect_with_retry(self.providers.shell(), ip, &self.credentials, policy).await {
            Ok(session) => {
                let outcome = run_best_effort(&session, STEP_SUPERVISOR_STOP, SUPERVISOR_STOP).await;
                session.close().await;
                outcome
            }
            Err(e) => {
                tracing::warn!(machine_id = %machine.id, ip, error = %format!("{e:#}"), "cannot reach host for graceful stop");
                StepOutcome::failed(STEP_SUPERVISOR_STOP, format!("{e:#}"))
            }
        }
    }

    /// Start a suspended machine, follow its address, and restart the app.
    ///
    /// Once the instance is started the resume succeeds: DNS and application
    /// failures only mark the outcome (and the machine's health) degraded.
    ///
    /// # Errors
    ///
    /// Fails without side effects unless the machine is `suspended`; fails
    /// when the compute provider cannot start the instance.
    pub async fn resume(&self, machine_id: &str) -> Result<ResumeOutcome> {
        let _guard = self.exclusive(machine_id).await?;
        let mut machine = self.load_in_state(machine_id, MachineState::Suspended).await?;
        let zone = zone_of(&machine)?;

        tracing::info!(machine_id, zone = %zone, "resuming machine");
        let timeout = self.config.compute.operation_timeout();
        let ip = tokio::time::timeout(timeout, self.providers.compute().start(&machine.host_name, &zone))
            .await
            .map_err(|_| anyhow::anyhow!("compute start timed out after {}s", timeout.as_secs()))?
            .with_context(|| format!("starting instance {} in {zone}", machine.host_name))?;

        let mut report = WorkflowReport::default();
        let ip_changed = machine.ip_address.as_deref() != Some(ip.as_str());
        if ip_changed {
            tracing::info!(
                machine_id,
                old_ip = machine.ip_address.as_deref().unwrap_or_default(),
                new_ip = %ip,
                "address changed; updating dns"
            );
            report.extend(self.repoint_dns(&mut machine, &ip).await);
            machine.ip_address = Some(ip.clone());
        }
        lifecycle::transition(&mut machine, MachineState::Running)?;
        self.persist(&mut machine).await?;

        self.settle().await;
        report.extend(self.restart_processes(&machine, &ip).await);

        machine.health = report.health();
        machine.last_error = report.failure_summary();
        if let Err(e) = self.persist(&mut machine).await {
            tracing::warn!(machine_id, error = %format!("{e:#}"), "persisting resume health");
        }
        if machine.health.is_degraded() {
            tracing::warn!(machine_id, ip = %ip, "machine resumed degraded");
        } else {
            tracing::info!(machine_id, ip = %ip, "machine resumed");
        }

        Ok(ResumeOutcome {
            ip_address: ip,
            ip_changed,
            health: machine.health.clone(),
            report,
        })
    }

    /// Delete the old record, then create one for `ip`. Both best-effort.
    async fn repoint_dns(&self, machine: &mut Machine, ip: &str) -> WorkflowReport {
        let dns = self.providers.dns();
        let seed = subdomain_seed(&machine.host_name);
        let mut report = WorkflowReport::default();

        report.record(match dns.delete_record(&seed).await {
            Ok(Deletion::Deleted | Deletion::NotFound) => StepOutcome::succeeded(STEP_DNS_DELETE),
            Err(e) => {
                tracing::warn!(machine_id = %machine.id, record = %seed, error = %format!("{e:#}"), "deleting old dns record failed");
                StepOutcome::failed(STEP_DNS_DELETE, format!("{e:#}"))
            }
        });

        report.record(match dns.create_record(&seed, ip).await {
            Ok(domain) => {
                machine.domain = Some(domain);
                StepOutcome::succeeded(STEP_DNS_CREATE)
            }
            Err(e) => {
                tracing::warn!(machine_id = %machine.id, record = %seed, ip, error = %format!("{e:#}"), "creating dns record failed");
                StepOutcome::failed(STEP_DNS_CREATE, format!("{e:#}"))
            }
        });
        report
    }

    async fn restart_processes(&self, machine: &Machine, ip: &str) -> WorkflowReport {
        let mut report = WorkflowReport::default();
        match connect_with_retry(self.providers.shell(), ip, &self.credentials, self.retry_policy()).await {
            Ok(session) => {
                report.record(run_best_effort(&session, STEP_PROXY_RELOAD, PROXY_RELOAD).await);
                report.record(run_best_effort(&session, STEP_SUPERVISOR_RESTART, SUPERVISOR_RESTART).await);
                session.close().await;
            }
            Err(e) => {
                tracing::warn!(machine_id = %machine.id, ip, error = %format!("{e:#}"), "host unreachable after resume");
                report.record(StepOutcome::failed(STEP_REMOTE_SHELL, format!("{e:#}")));
            }
        }
        report
    }
}

fn zone_of(machine: &Machine) -> Result<String> {
    machine.zone.clone().ok_or_else(|| {
        ProvisionError::MissingField {
            id: machine.id.clone(),
            field: "zone",
        }
        .into()
    })
}
