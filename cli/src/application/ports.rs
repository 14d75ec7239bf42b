//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and the shared wire types,
//! never from `crate::infra`, `crate::commands`, or `crate::output`.

use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use devmachine_common::{AppRuntime, Machine};

use crate::domain::{MachineTask, SshCredentials};

// ── Value Types ───────────────────────────────────────────────────────────────

/// Outcome of an idempotent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    /// The resource was already gone. Callers treat this as success.
    NotFound,
}

/// A freshly created compute instance.
#[derive(Debug, Clone)]
pub struct ProvisionedInstance {
    /// External address assigned by the provider.
    pub ip: String,
    /// Credentials installed on the instance at creation.
    pub credentials: SshCredentials,
}

/// Result of a single remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ── Resource Provisioner Ports ────────────────────────────────────────────────

/// Compute instance lifecycle: create, start, stop, delete.
#[allow(async_fn_in_trait)]
pub trait ComputeProvisioner {
    /// Create an instance in `zone` reachable with `credentials`.
    async fn create(
        &self,
        name: &str,
        zone: &str,
        credentials: &SshCredentials,
    ) -> Result<ProvisionedInstance>;
    /// Start a stopped instance and return its (possibly new) external address.
    async fn start(&self, name: &str, zone: &str) -> Result<String>;
    /// Stop a running instance, keeping its disk.
    async fn stop(&self, name: &str, zone: &str) -> Result<()>;
    /// Delete the instance and its boot disk.
    async fn delete(&self, name: &str, zone: &str) -> Result<Deletion>;
}

/// Subdomain records pointing at machine addresses.
#[allow(async_fn_in_trait)]
pub trait DnsProvisioner {
    /// Point `<seed>.<base domain>` at `ip` and return the full domain.
    /// Replaces an existing record of the same name.
    async fn create_record(&self, seed: &str, ip: &str) -> Result<String>;
    /// Remove the record for `<seed>.<base domain>`.
    async fn delete_record(&self, seed: &str) -> Result<Deletion>;
}

/// TLS certificate issuance, performed on the host itself.
#[allow(async_fn_in_trait)]
pub trait CertificateProvisioner {
    /// Issue a certificate for `domain` and return the certificate chain path.
    async fn issue(&self, session: &impl RemoteSession, domain: &str) -> Result<String>;
}

/// Managed backend projects paired one-to-one with machines.
#[allow(async_fn_in_trait)]
pub trait BackendProjectProvisioner {
    /// Create a project and a deploy credential for it.
    async fn create_project(&self, name: &str) -> Result<AppRuntime>;
    /// Delete the project identified by `project_id` at `url`.
    async fn delete_project(&self, url: &str, project_id: &str) -> Result<Deletion>;
    /// Publish environment variables to the project's deployment.
    async fn set_environment(&self, runtime: &AppRuntime, vars: &[(String, String)]) -> Result<()>;
}

// ── Remote Shell Ports ────────────────────────────────────────────────────────

/// Opens remote-shell sessions to hosts.
#[allow(async_fn_in_trait)]
pub trait RemoteExecutor {
    type Session: RemoteSession;

    /// Open one session. A single attempt; retry policy lives in the caller.
    async fn connect(
        &self,
        ip: &str,
        credentials: &SshCredentials,
        timeout: Duration,
    ) -> Result<Self::Session>;
}

/// An open remote-shell session.
#[allow(async_fn_in_trait)]
pub trait RemoteSession: Sized {
    /// Run `command` through a login shell on the host.
    async fn exec(&self, command: &str) -> Result<CommandOutput>;
    /// Release the session. Implementations log their own failures.
    async fn close(self);
}

/// Every external system the orchestrator drives.
pub trait Provisioners {
    type Compute: ComputeProvisioner;
    type Dns: DnsProvisioner;
    type Certificates: CertificateProvisioner;
    type Backend: BackendProjectProvisioner;
    type Shell: RemoteExecutor;

    fn compute(&self) -> &Self::Compute;
    fn dns(&self) -> &Self::Dns;
    fn certificates(&self) -> &Self::Certificates;
    fn backend(&self) -> &Self::Backend;
    fn shell(&self) -> &Self::Shell;
}

// ── Persistence Ports ─────────────────────────────────────────────────────────

/// Durable machine records.
#[allow(async_fn_in_trait)]
pub trait MachineStore {
    /// Proof of exclusive access; dropping it releases the lock.
    type Lock;

    /// Wait for exclusive access to `key` across every process sharing this
    /// store. Keys are machine ids or `owner:<host name>`.
    async fn lock(&self, key: &str) -> Result<Self::Lock>;
    async fn load(&self, id: &str) -> Result<Option<Machine>>;
    async fn save(&self, machine: &Machine) -> Result<()>;
    /// Remove a record. Removing a missing record is not an error.
    async fn remove(&self, id: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<Machine>>;
}

/// Durable at-least-once task queue keyed by machine id.
///
/// A claimed task stays in flight until acknowledged. Once the worker that
/// claimed it has exited, `recover` hands it out again.
#[allow(async_fn_in_trait)]
pub trait TaskQueue {
    async fn enqueue(&self, task: &MachineTask) -> Result<()>;
    /// Claim up to `limit` pending tasks, oldest first.
    async fn claim(&self, limit: usize) -> Result<Vec<MachineTask>>;
    async fn ack(&self, task_id: &str) -> Result<()>;
    /// Return tasks claimed by exited workers to pending. Returns how many were moved.
    async fn recover(&self) -> Result<usize>;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Output>;
}
