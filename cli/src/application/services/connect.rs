//! Remote-shell connection discipline and command helpers.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::time::Duration;

use anyhow::Result;

use crate::application::ports::{CommandOutput, RemoteExecutor, RemoteSession};
use crate::domain::config::SshConfig;
use crate::domain::{ProvisionError, SshCredentials, StepOutcome};

/// How many times to try, how long each try may take, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub per_attempt_timeout: Duration,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Policy used by creation phases and resume.
    #[must_use]
    pub fn from_config(ssh: &SshConfig) -> Self {
        Self {
            attempts: ssh.connect_attempts,
            per_attempt_timeout: ssh.connect_timeout(),
            delay: ssh.retry_delay(),
        }
    }

    /// One attempt, no waiting. Used where connectivity is best-effort.
    #[must_use]
    pub fn single(ssh: &SshConfig) -> Self {
        Self {
            attempts: 1,
            per_attempt_timeout: ssh.connect_timeout(),
            delay: Duration::ZERO,
        }
    }
}

/// Open a session to `ip`, retrying with a fixed delay.
///
/// Each attempt is bounded by `policy.per_attempt_timeout` regardless of what
/// the executor does internally.
///
/// # Errors
///
/// Returns `ProvisionError::Unreachable` once every attempt has failed.
pub async fn connect_with_retry<E: RemoteExecutor>(
    shell: &E,
    ip: &str,
    credentials: &SshCredentials,
    policy: RetryPolicy,
) -> Result<E::Session> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        let result = tokio::time::timeout(
            policy.per_attempt_timeout,
            shell.connect(ip, credentials, policy.per_attempt_timeout),
        )
        .await;
        match result {
            Ok(Ok(session)) => {
                tracing::debug!(ip, attempt, "remote shell connected");
                return Ok(session);
            }
            Ok(Err(e)) => {
                tracing::warn!(ip, attempt, attempts, error = %format!("{e:#}"), "remote shell connect failed");
            }
            Err(_) => {
                tracing::warn!(
                    ip,
                    attempt,
                    attempts,
                    timeout_secs = policy.per_attempt_timeout.as_secs(),
                    "remote shell connect timed out"
                );
            }
        }
        if attempt < attempts && !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
    }
    Err(ProvisionError::Unreachable {
        ip: ip.to_string(),
        attempts,
    }
    .into())
}

/// Run a step whose failure aborts the current phase.
///
/// # Errors
///
/// Returns `ProvisionError::Bootstrap` on a non-zero exit, or the transport error.
pub async fn run_required(
    session: &impl RemoteSession,
    step: &str,
    command: &str,
) -> Result<CommandOutput> {
    tracing::debug!(step, "running required step");
    let output = session.exec(command).await?;
    if !output.success() {
        return Err(ProvisionError::Bootstrap {
            step: step.to_string(),
            exit_code: output.exit_code,
            stderr: tail(&output.stderr),
        }
        .into());
    }
    Ok(output)
}

/// Run a step whose failure is logged and recorded but never propagated.
pub async fn run_best_effort(
    session: &impl RemoteSession,
    step: &str,
    command: &str,
) -> StepOutcome {
    match session.exec(command).await {
        Ok(output) if output.success() => StepOutcome::succeeded(step),
        Ok(output) => {
            let detail = format!("exit code {}: {}", output.exit_code, tail(&output.stderr));
            tracing::warn!(step, error = %detail, "best-effort step failed");
            StepOutcome::failed(step, detail)
        }
        Err(e) => {
            let detail = format!("{e:#}");
            tracing::warn!(step, error = %detail, "best-effort step failed");
            StepOutcome::failed(step, detail)
        }
    }
}

/// Last few lines of a command's stderr, enough to diagnose without flooding logs.
fn tail(stderr: &str) -> String {
    const MAX_LINES: usize = 5;
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(MAX_LINES);
    lines[start..].join("\n")
}
