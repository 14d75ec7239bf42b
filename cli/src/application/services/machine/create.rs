//! Creation pipeline: Phase A (infrastructure) and Phase B (application).

use anyhow::{Context, Result};
use devmachine_common::{Machine, MachineState, RepoInfo};

use crate::application::ports::{
    ComputeProvisioner, Deletion, DnsProvisioner, MachineStore, ProvisionedInstance,
    Provisioners, RemoteSession, TaskQueue,
};
use crate::application::services::bootstrap::{
    ApplicationBootstrapper, bootstrap_system, configure_proxy,
};
use crate::application::services::connect::connect_with_retry;
use crate::domain::naming::{backend_project_name, subdomain_seed};
use crate::domain::{
    MachineTask, PhaseContext, ProvisionError, StepOutcome, TaskKind, WorkflowReport, lifecycle,
};

use super::Orchestrator;

impl<P: Provisioners, S: MachineStore, Q: TaskQueue> Orchestrator<P, S, Q> {
    /// Phase A: compute instance, system bootstrap, DNS record.
    ///
    /// On success the machine is `infrastructure_ready` with zone, IP, and
    /// domain persisted, and Phase B is enqueued. On failure the machine is
    /// `failed` and its resources have been released.
    ///
    /// A redelivered task for a machine that already reached
    /// `infrastructure_ready` only re-enqueues Phase B.
    ///
    /// # Errors
    ///
    /// Returns `MachineError` when the machine is missing or in another
    /// state, otherwise the error that failed the phase.
    pub async fn provision_infrastructure(
        &self,
        machine_id: &str,
        repo: Option<RepoInfo>,
    ) -> Result<()> {
        let _guard = self.exclusive(machine_id).await?;
        let mut machine = self.load(machine_id).await?;

        if machine.state == MachineState::InfrastructureReady {
            tracing::info!(machine_id, "infrastructure already provisioned; re-enqueueing application setup");
            return self.enqueue_application(machine_id, repo).await;
        }
        lifecycle::expect_state(&machine, MachineState::CreatingInfrastructure)?;

        tracing::info!(machine_id, host = %machine.host_name, "provisioning infrastructure");
        if let Err(e) = self.run_infrastructure(&mut machine).await {
            self.fail_and_teardown(&mut machine, &e).await;
            return Err(e);
        }
        tracing::info!(
            machine_id,
            zone = machine.zone.as_deref().unwrap_or_default(),
            ip = machine.ip_address.as_deref().unwrap_or_default(),
            domain = machine.domain.as_deref().unwrap_or_default(),
            "infrastructure ready"
        );
        self.enqueue_application(machine_id, repo).await
    }

    async fn enqueue_application(&self, machine_id: &str, repo: Option<RepoInfo>) -> Result<()> {
        let task = MachineTask::new(machine_id, TaskKind::SetupApplication { repo });
        self.queue
            .enqueue(&task)
            .await
            .with_context(|| format!("enqueueing application setup for {machine_id}"))
    }

    async fn run_infrastructure(&self, machine: &mut Machine) -> Result<()> {
        if let Some(zone) = machine.zone.take() {
            tracing::warn!(machine_id = %machine.id, zone = %zone, "interrupted creation left an instance; removing it");
            self.cleanup_partial_instance(&machine.host_name, &zone).await;
            self.persist(machine).await?;
        }

        let instance = self.create_in_first_zone(machine).await?;
        self.settle().await;

        let session = connect_with_retry(
            self.providers.shell(),
            &instance.ip,
            &instance.credentials,
            self.retry_policy(),
        )
        .await?;
        let result = self.prepare_host(&session, machine, &instance).await;
        session.close().await;
        result
    }

    async fn prepare_host(
        &self,
        session: &impl RemoteSession,
        machine: &mut Machine,
        instance: &ProvisionedInstance,
    ) -> Result<()> {
        let report =
            bootstrap_system(session, &self.config.bootstrap, &instance.credentials.user).await?;
        for failure in report.failures() {
            tracing::warn!(machine_id = %machine.id, step = %failure.step, "optional system step failed");
        }

        let seed = subdomain_seed(&machine.host_name);
        let domain = self
            .providers
            .dns()
            .create_record(&seed, &instance.ip)
            .await
            .with_context(|| format!("creating dns record {seed} -> {}", instance.ip))?;

        machine.ip_address = Some(instance.ip.clone());
        machine.domain = Some(domain);
        self.advance(machine, MachineState::InfrastructureReady).await
    }

    /// Try each configured zone in order; the first success wins.
    async fn create_in_first_zone(&self, machine: &mut Machine) -> Result<ProvisionedInstance> {
        let compute = self.providers.compute();
        let timeout = self.config.compute.operation_timeout();

        for zone in &self.config.zones {
            tracing::info!(machine_id = %machine.id, zone = %zone, "creating compute instance");
            let attempt =
                tokio::time::timeout(timeout, compute.create(&machine.host_name, zone, &self.credentials))
                    .await;
            let error = match attempt {
                Ok(Ok(instance)) => {
                    machine.zone = Some(zone.clone());
                    self.persist(machine).await?;
                    return Ok(instance);
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => format!("timed out after {}s", timeout.as_secs()),
            };
            tracing::warn!(machine_id = %machine.id, zone = %zone, error = %error, "compute creation failed; trying next zone");
            self.cleanup_partial_instance(&machine.host_name, zone).await;
        }

        Err(ProvisionError::NoZoneAvailable {
            tried: self.config.zones.join(", "),
        }
        .into())
    }

    /// Best-effort delete of whatever a failed create left behind in `zone`.
    async fn cleanup_partial_instance(&self, name: &str, zone: &str) {
        let timeout = self.config.compute.operation_timeout();
        match tokio::time::timeout(timeout, self.providers.compute().delete(name, zone)).await {
            Ok(Ok(Deletion::Deleted)) => {
                tracing::info!(instance = name, zone, "removed partial instance");
            }
            Ok(Ok(Deletion::NotFound)) => {}
            Ok(Err(e)) => {
                tracing::warn!(instance = name, zone, error = %format!("{e:#}"), "partial instance cleanup failed");
            }
            Err(_) => {
                tracing::warn!(instance = name, zone, "partial instance cleanup timed out");
            }
        }
    }

    /// Phase B: certificate and proxy, then repository, backend project, processes.
    ///
    /// A redelivered task for a machine still in `setting_up_application`
    /// resumes the phase, reusing an already persisted backend project.
    ///
    /// # Errors
    ///
    /// Returns `MachineError` when the machine is missing or in another
    /// state, otherwise the error that failed the phase.
    pub async fn setup_application(
        &self,
        machine_id: &str,
        repo: Option<RepoInfo>,
    ) -> Result<WorkflowReport> {
        let _guard = self.exclusive(machine_id).await?;
        let mut machine = self.load(machine_id).await?;

        if machine.state == MachineState::SettingUpApplication {
            tracing::warn!(machine_id, "resuming interrupted application setup");
        } else {
            lifecycle::expect_state(&machine, MachineState::InfrastructureReady)?;
            self.advance(&mut machine, MachineState::SettingUpApplication).await?;
        }

        tracing::info!(machine_id, repo = repo.is_some(), "setting up application");
        match self.run_application(&mut machine, repo.as_ref()).await {
            Ok(report) => {
                tracing::info!(machine_id, domain = machine.domain.as_deref().unwrap_or_default(), "machine running");
                Ok(report)
            }
            Err(e) => {
                self.fail_and_teardown(&mut machine, &e).await;
                Err(e)
            }
        }
    }

    async fn run_application(
        &self,
        machine: &mut Machine,
        repo: Option<&RepoInfo>,
    ) -> Result<WorkflowReport> {
        let ctx = PhaseContext::from_machine(machine, &self.credentials)?;
        let session =
            connect_with_retry(self.providers.shell(), &ctx.ip, &ctx.credentials, self.retry_policy())
                .await?;
        let result = self.setup_on_host(&session, machine, &ctx, repo).await;
        session.close().await;
        let report = result?;

        let mut running = machine.clone();
        lifecycle::transition(&mut running, MachineState::Running)?;
        lifecycle::check_invariants(&running, repo.is_some())?;
        running.health = report.health();
        running.last_error = report.failure_summary();
        *machine = running;
        self.persist(machine).await?;
        Ok(report)
    }

    async fn setup_on_host(
        &self,
        session: &impl RemoteSession,
        machine: &mut Machine,
        ctx: &PhaseContext,
        repo: Option<&RepoInfo>,
    ) -> Result<WorkflowReport> {
        let mut report = WorkflowReport::default();

        // The site url scheme depends on whether a certificate was issued.
        let certificate =
            configure_proxy(self.providers.certificates(), session, &ctx.domain, &self.config.bootstrap)
                .await?;
        let scheme = if certificate.ok { "https" } else { "http" };
        report.record(certificate);

        if let Some(repo) = repo {
            let boot =
                ApplicationBootstrapper::new(self.providers.backend(), session, &self.config.bootstrap);
            boot.clone_repository(repo).await?;

            let runtime = match machine.app_runtime.clone() {
                Some(existing) => existing,
                None => {
                    let runtime = boot
                        .provision_backend(&backend_project_name(&machine.host_name))
                        .await?;
                    machine.app_runtime = Some(runtime.clone());
                    self.persist(machine).await?;
                    runtime
                }
            };

            let site_url = format!("{scheme}://{}", ctx.domain);
            report.extend(boot.configure_backend_auth(&runtime, &site_url).await);
            boot.write_runtime_config(&runtime, &site_url).await?;
            boot.start_processes().await?;
        } else {
            tracing::info!(machine_id = %machine.id, "no repository credentials; skipping application bootstrap");
            report.record(StepOutcome::skipped("application"));
        }
        Ok(report)
    }

    /// Mark the machine failed, persist, and release its external resources.
    ///
    /// The record is kept so the failure stays visible; deleting it is the
    /// caller's decision.
    async fn fail_and_teardown(&self, machine: &mut Machine, error: &anyhow::Error) {
        let message = format!("{error:#}");
        tracing::error!(machine_id = %machine.id, state = %machine.state, error = %message, "phase failed; tearing down");

        machine.last_error = Some(message.clone());
        if let Err(e) = lifecycle::transition(machine, MachineState::Failed) {
            tracing::error!(machine_id = %machine.id, error = %e, "cannot mark machine failed");
        }
        if let Err(e) = self.persist(machine).await {
            tracing::error!(machine_id = %machine.id, error = %format!("{e:#}"), "persisting failed state");
        }

        let report = self.release_resources(machine).await;
        if let Some(cleanup) = report.failure_summary() {
            machine.last_error = Some(format!("{message}; cleanup failed: {cleanup}"));
            if let Err(e) = self.persist(machine).await {
                tracing::error!(machine_id = %machine.id, error = %format!("{e:#}"), "persisting cleanup failures");
            }
        }
    }
}
