//! Queue worker: claims phase tasks and runs them through the orchestrator.
//!
//! Tasks for different machines in one batch run concurrently; tasks for the
//! same machine run one after another. A task is acknowledged once its
//! outcome is durable (success, a `failed` machine, or a stale precondition).
//! Anything else stays in flight until this worker exits; the next worker's
//! `recover` hands it out again.

use std::ops::AddAssign;
use std::time::Duration;

use anyhow::Result;
use devmachine_common::MachineState;
use futures_util::future::join_all;
use serde::Serialize;

use crate::application::ports::{MachineStore, Provisioners, TaskQueue};
use crate::application::services::machine::Orchestrator;
use crate::domain::{MachineError, MachineTask, TaskKind};

/// Counts of task outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: usize,
    /// The phase failed and the machine is now `failed`.
    pub failed: usize,
    /// Precondition no longer held; acknowledged without effect.
    pub dropped: usize,
    /// Left in flight for redelivery.
    pub deferred: usize,
}

impl BatchSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.dropped + self.deferred
    }
}

impl AddAssign for BatchSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.completed += rhs.completed;
        self.failed += rhs.failed;
        self.dropped += rhs.dropped;
        self.deferred += rhs.deferred;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Completed,
    Failed,
    Dropped,
    Deferred,
}

pub struct Worker<'a, P, S, Q> {
    orchestrator: &'a Orchestrator<P, S, Q>,
    batch_size: usize,
}

impl<'a, P: Provisioners, S: MachineStore, Q: TaskQueue> Worker<'a, P, S, Q> {
    #[must_use]
    pub fn new(orchestrator: &'a Orchestrator<P, S, Q>, batch_size: usize) -> Self {
        Self {
            orchestrator,
            batch_size: batch_size.max(1),
        }
    }

    /// Claim one batch and process it.
    ///
    /// # Errors
    ///
    /// Fails only when the queue cannot be read.
    pub async fn run_once(&self) -> Result<BatchSummary> {
        let tasks = self.orchestrator.queue().claim(self.batch_size).await?;
        if tasks.is_empty() {
            return Ok(BatchSummary::default());
        }
        tracing::debug!(count = tasks.len(), "claimed tasks");

        let mut groups: Vec<Vec<MachineTask>> = Vec::new();
        for task in tasks {
            match groups.iter_mut().find(|g| g[0].machine_id == task.machine_id) {
                Some(group) => group.push(task),
                None => groups.push(vec![task]),
            }
        }

        let mut summary = BatchSummary::default();
        for group_summary in join_all(groups.into_iter().map(|g| self.run_group(g))).await {
            summary += group_summary;
        }
        Ok(summary)
    }

    /// Process batches until the queue has nothing pending.
    ///
    /// # Errors
    ///
    /// Fails only when the queue cannot be read.
    pub async fn drain(&self) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        loop {
            let batch = self.run_once().await?;
            if batch.total() == 0 {
                return Ok(summary);
            }
            summary += batch;
        }
    }

    /// Recover in-flight tasks, then poll until interrupted.
    ///
    /// Interruption is only observed between batches; a running phase is
    /// never cancelled.
    ///
    /// # Errors
    ///
    /// Fails when the queue cannot be recovered or read.
    pub async fn run(&self, poll_interval: Duration) -> Result<()> {
        let recovered = self.orchestrator.queue().recover().await?;
        if recovered > 0 {
            tracing::info!(recovered, "returned in-flight tasks to the queue");
        }
        tracing::info!(poll_secs = poll_interval.as_secs(), "worker started");
        loop {
            let summary = self.drain().await?;
            if summary.total() > 0 {
                tracing::info!(
                    completed = summary.completed,
                    failed = summary.failed,
                    dropped = summary.dropped,
                    deferred = summary.deferred,
                    "batch finished"
                );
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received shutdown signal");
                    return Ok(());
                }
                () = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    async fn run_group(&self, tasks: Vec<MachineTask>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for task in tasks {
            match self.run_task(&task).await {
                Disposition::Completed => summary.completed += 1,
                Disposition::Failed => summary.failed += 1,
                Disposition::Dropped => summary.dropped += 1,
                Disposition::Deferred => summary.deferred += 1,
            }
        }
        summary
    }

    async fn run_task(&self, task: &MachineTask) -> Disposition {
        let machine_id = task.machine_id.as_str();
        tracing::info!(machine_id, task = task.kind.name(), task_id = %task.id, "running task");

        let result = match &task.kind {
            TaskKind::ProvisionInfrastructure { repo } => {
                self.orchestrator
                    .provision_infrastructure(machine_id, repo.clone())
                    .await
            }
            TaskKind::SetupApplication { repo } => self
                .orchestrator
                .setup_application(machine_id, repo.clone())
                .await
                .map(|_| ()),
        };

        let disposition = match result {
            Ok(()) => Disposition::Completed,
            Err(e) => self.classify_failure(task, &e).await,
        };

        if disposition != Disposition::Deferred
            && let Err(e) = self.orchestrator.queue().ack(&task.id).await
        {
            tracing::error!(machine_id, task_id = %task.id, error = %format!("{e:#}"), "acknowledging task");
        }
        disposition
    }

    async fn classify_failure(&self, task: &MachineTask, error: &anyhow::Error) -> Disposition {
        let machine_id = task.machine_id.as_str();
        if let Some(
            MachineError::NotFound(_) | MachineError::UnexpectedState { .. },
        ) = error.downcast_ref::<MachineError>()
        {
            tracing::warn!(machine_id, task = task.kind.name(), reason = %error, "dropping stale task");
            return Disposition::Dropped;
        }

        match self.orchestrator.store().load(machine_id).await {
            Ok(Some(machine)) if machine.state.is_creating() => {
                tracing::error!(
                    machine_id,
                    state = %machine.state,
                    error = %format!("{error:#}"),
                    "task failed before its outcome was persisted; leaving it in flight"
                );
                Disposition::Deferred
            }
            Ok(Some(machine)) if machine.state != MachineState::Failed => {
                tracing::warn!(machine_id, state = %machine.state, error = %format!("{error:#}"), "task failed");
                Disposition::Failed
            }
            Ok(_) => Disposition::Failed,
            Err(load) => {
                tracing::error!(machine_id, error = %format!("{load:#}"), "cannot inspect machine after failure");
                Disposition::Deferred
            }
        }
    }
}
