//! Machine Orchestrator: the phased state machine behind create, suspend,
//! resume, and delete.
//!
//! Every workflow takes the machine's lock, reloads the persisted record,
//! checks its precondition, and persists each checkpoint before moving on.

mod api;
mod create;
mod power;
mod teardown;

pub use power::{
    STEP_COMPUTE_STOP, STEP_DNS_CREATE, STEP_DNS_DELETE, STEP_PROXY_RELOAD, STEP_REMOTE_SHELL,
    STEP_SUPERVISOR_RESTART, STEP_SUPERVISOR_STOP,
};
pub use teardown::{STEP_DELETE_BACKEND, STEP_DELETE_COMPUTE, STEP_DELETE_DNS};

use anyhow::{Context, Result};
use devmachine_common::{Machine, MachineState};

use crate::application::ports::{MachineStore, Provisioners, TaskQueue};
use crate::application::services::connect::RetryPolicy;
use crate::application::services::locks::{Exclusive, MachineLocks};
use crate::domain::{MachineError, ProvisioningConfig, SshCredentials, lifecycle};

/// Drives machines through their lifecycle.
pub struct Orchestrator<P, S, Q> {
    providers: P,
    store: S,
    queue: Q,
    config: ProvisioningConfig,
    credentials: SshCredentials,
    locks: MachineLocks,
}

impl<P: Provisioners, S: MachineStore, Q: TaskQueue> Orchestrator<P, S, Q> {
    pub fn new(providers: P, store: S, queue: Q, config: ProvisioningConfig) -> Self {
        let credentials = SshCredentials {
            user: config.ssh.user.clone(),
            private_key_path: config.ssh.private_key_path.clone(),
            public_key_path: config.ssh.public_key_path.clone(),
        };
        Self {
            providers,
            store,
            queue,
            config,
            credentials,
            locks: MachineLocks::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    #[must_use]
    pub fn providers(&self) -> &P {
        &self.providers
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.ssh)
    }

    /// Serialise workflows on `key`: first within this process, then with
    /// every other process sharing the store.
    async fn exclusive(&self, key: &str) -> Result<Exclusive<S::Lock>> {
        let local = self.locks.acquire(key).await;
        let shared = self
            .store
            .lock(key)
            .await
            .with_context(|| format!("locking {key}"))?;
        Ok(Exclusive::new(local, shared))
    }

    async fn load(&self, id: &str) -> Result<Machine> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| MachineError::NotFound(id.to_string()).into())
    }

    /// Load `id` and require it to be in `expected`.
    async fn load_in_state(&self, id: &str, expected: MachineState) -> Result<Machine> {
        let machine = self.load(id).await?;
        lifecycle::expect_state(&machine, expected)?;
        Ok(machine)
    }

    /// Apply a transition and persist it.
    async fn advance(&self, machine: &mut Machine, to: MachineState) -> Result<()> {
        lifecycle::transition(machine, to)?;
        self.persist(machine).await
    }

    async fn persist(&self, machine: &mut Machine) -> Result<()> {
        machine.touch();
        self.store
            .save(machine)
            .await
            .with_context(|| format!("saving machine {}", machine.id))
    }

    async fn settle(&self) {
        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            tracing::debug!(secs = delay.as_secs(), "waiting for infrastructure to settle");
            tokio::time::sleep(delay).await;
        }
    }
}
