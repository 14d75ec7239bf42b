//! Application Bootstrapper: repository, backend project, runtime config,
//! supervised processes, and the TLS-terminating reverse proxy.
//!
//! The orchestrator drives these steps one at a time so it can persist the
//! backend project as soon as it exists.

use anyhow::{Context, Result};
use devmachine_common::{AppRuntime, RepoInfo};

use crate::application::ports::{BackendProjectProvisioner, CertificateProvisioner, RemoteSession};
use crate::application::services::connect::run_required;
use crate::domain::config::BootstrapConfig;
use crate::domain::recipe::{
    self, AuthKeys, ENV_JWKS, ENV_JWT_PRIVATE_KEY, ENV_SITE_URL, KEYGEN_SCRIPT, TlsPaths,
};
use crate::domain::{StepOutcome, WorkflowReport};

pub const STEP_AUTH_KEYGEN: &str = "auth-keygen";
pub const STEP_AUTH_PRIVATE_KEY: &str = "auth-private-key";
pub const STEP_AUTH_JWKS: &str = "auth-jwks";
pub const STEP_AUTH_SITE_URL: &str = "auth-site-url";
pub const STEP_CERTIFICATE: &str = "certificate";

/// Sets up the tenant application on a host over one session.
pub struct ApplicationBootstrapper<'a, B, S> {
    backend: &'a B,
    session: &'a S,
    config: &'a BootstrapConfig,
}

impl<'a, B: BackendProjectProvisioner, S: RemoteSession> ApplicationBootstrapper<'a, B, S> {
    pub fn new(backend: &'a B, session: &'a S, config: &'a BootstrapConfig) -> Self {
        Self {
            backend,
            session,
            config,
        }
    }

    /// Clone the tenant repository into the app directory.
    ///
    /// # Errors
    ///
    /// Fails for non-https URLs or when `git` exits non-zero.
    pub async fn clone_repository(&self, repo: &RepoInfo) -> Result<()> {
        let url = recipe::authenticated_clone_url(&repo.clone_url, &repo.access_token)?;
        let script = recipe::clone_script(&url, &repo.clone_url, &self.config.app_dir);
        run_required(self.session, "clone-repository", &script)
            .await
            .map(|_| ())
            .map_err(|e| redact(e, &repo.access_token))
    }

    /// Create the backend project and its deploy credential.
    ///
    /// # Errors
    ///
    /// Propagates backend platform failures.
    pub async fn provision_backend(&self, name: &str) -> Result<AppRuntime> {
        self.backend
            .create_project(name)
            .await
            .with_context(|| format!("creating backend project {name}"))
    }

    /// Generate a signing key pair and publish it to the backend project.
    ///
    /// Every sub-step is tolerated: failures land in the returned report.
    pub async fn configure_backend_auth(&self, runtime: &AppRuntime, site_url: &str) -> WorkflowReport {
        let mut report = WorkflowReport::default();

        let keys = match self.generate_keys().await {
            Ok(keys) => {
                report.record(StepOutcome::succeeded(STEP_AUTH_KEYGEN));
                Some(keys)
            }
            Err(e) => {
                tracing::warn!(step = STEP_AUTH_KEYGEN, error = %format!("{e:#}"), "auth key generation failed");
                report.record(StepOutcome::failed(STEP_AUTH_KEYGEN, format!("{e:#}")));
                None
            }
        };

        let mut publish = Vec::new();
        if let Some(keys) = keys {
            publish.push((STEP_AUTH_PRIVATE_KEY, ENV_JWT_PRIVATE_KEY, keys.private_key));
            publish.push((STEP_AUTH_JWKS, ENV_JWKS, keys.jwks));
        } else {
            report.record(StepOutcome::skipped(STEP_AUTH_PRIVATE_KEY));
            report.record(StepOutcome::skipped(STEP_AUTH_JWKS));
        }
        publish.push((STEP_AUTH_SITE_URL, ENV_SITE_URL, site_url.to_string()));

        for (step, name, value) in publish {
            let vars = [(name.to_string(), value)];
            match self.backend.set_environment(runtime, &vars).await {
                Ok(()) => report.record(StepOutcome::succeeded(step)),
                Err(e) => {
                    tracing::warn!(step, variable = name, error = %format!("{e:#}"), "publishing backend variable failed");
                    report.record(StepOutcome::failed(step, format!("{e:#}")));
                }
            }
        }
        report
    }

    async fn generate_keys(&self) -> Result<AuthKeys> {
        let output = run_required(self.session, STEP_AUTH_KEYGEN, KEYGEN_SCRIPT).await?;
        Ok(recipe::parse_auth_keys(&output.stdout)?)
    }

    /// Write `.env.local` and the process supervisor's ecosystem file.
    ///
    /// # Errors
    ///
    /// Fails when either file cannot be written on the host.
    pub async fn write_runtime_config(&self, runtime: &AppRuntime, site_url: &str) -> Result<()> {
        let env = recipe::env_file(runtime, site_url);
        let ecosystem = recipe::ecosystem_file(&self.config.app_dir, self.config.app_port);
        let script = recipe::write_runtime_config_script(&self.config.app_dir, &env, &ecosystem);
        run_required(self.session, "runtime-config", &script).await?;
        Ok(())
    }

    /// Install dependencies and start the app and backend dev processes.
    ///
    /// # Errors
    ///
    /// Fails when `npm install` or the supervisor exits non-zero.
    pub async fn start_processes(&self) -> Result<()> {
        let script = recipe::start_processes_script(&self.config.app_dir);
        run_required(self.session, "start-processes", &script).await?;
        Ok(())
    }
}

/// Issue a certificate (non-fatal) and install the reverse proxy site.
///
/// Returns the certificate outcome: without a certificate the site is served
/// over plain HTTP.
///
/// # Errors
///
/// Fails only when the proxy configuration cannot be installed.
pub async fn configure_proxy(
    certificates: &impl CertificateProvisioner,
    session: &impl RemoteSession,
    domain: &str,
    config: &BootstrapConfig,
) -> Result<StepOutcome> {
    let (tls, outcome) = match certificates.issue(session, domain).await {
        Ok(path) => (
            Some(TlsPaths::from_certificate(&path)),
            StepOutcome::succeeded(STEP_CERTIFICATE),
        ),
        Err(e) => {
            tracing::warn!(domain, error = %format!("{e:#}"), "certificate issuance failed; serving plain http");
            (None, StepOutcome::failed(STEP_CERTIFICATE, format!("{e:#}")))
        }
    };
    let site = recipe::nginx_site(domain, config.app_port, tls.as_ref());
    run_required(session, "reverse-proxy", &recipe::install_site_script(domain, &site))
        .await
        .context("configuring reverse proxy")?;
    Ok(outcome)
}

/// Strip `secret` from an error message before it is logged or persisted.
fn redact(err: anyhow::Error, secret: &str) -> anyhow::Error {
    if secret.is_empty() {
        return err;
    }
    anyhow::Error::msg(format!("{err:#}").replace(secret, "***"))
}
