//! Production wiring of the `Provisioners` bundle.

use anyhow::Result;

use crate::application::ports::Provisioners;
use crate::domain::ProvisioningConfig;
use crate::infra::backend_project::ManagedBackend;
use crate::infra::certificate::CertbotIssuer;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::compute::GceCompute;
use crate::infra::dns::CloudflareDns;
use crate::infra::secrets::ProviderSecrets;
use crate::infra::ssh::SshExecutor;

pub struct CloudProvisioners {
    compute: GceCompute,
    dns: CloudflareDns,
    certificates: CertbotIssuer,
    backend: ManagedBackend,
    shell: SshExecutor<TokioCommandRunner>,
}

impl CloudProvisioners {
    /// Missing credentials are reported when the provider is first used.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: &ProvisioningConfig, secrets: ProviderSecrets) -> Result<Self> {
        Ok(Self {
            compute: GceCompute::new(config.compute.clone(), secrets.compute_token)?,
            dns: CloudflareDns::new(config.dns.clone(), secrets.dns_token)?,
            certificates: CertbotIssuer::new(config.bootstrap.certificate_email.clone()),
            backend: ManagedBackend::new(config.backend.clone(), secrets.backend_token)?,
            shell: SshExecutor::new(TokioCommandRunner::new(), config.ssh.command_timeout()),
        })
    }
}

impl Provisioners for CloudProvisioners {
    type Compute = GceCompute;
    type Dns = CloudflareDns;
    type Certificates = CertbotIssuer;
    type Backend = ManagedBackend;
    type Shell = SshExecutor<TokioCommandRunner>;

    fn compute(&self) -> &Self::Compute {
        &self.compute
    }

    fn dns(&self) -> &Self::Dns {
        &self.dns
    }

    fn certificates(&self) -> &Self::Certificates {
        &self.certificates
    }

    fn backend(&self) -> &Self::Backend {
        &self.backend
    }

    fn shell(&self) -> &Self::Shell {
        &self.shell
    }
}
