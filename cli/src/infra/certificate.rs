//! Let's Encrypt issuance through certbot on the target host.

use anyhow::Result;

use crate::application::ports::{CertificateProvisioner, RemoteSession};
use crate::application::services::connect::run_required;
use crate::domain::recipe::{certbot_script, letsencrypt_certificate_path};

/// Runs certbot's nginx authenticator over the machine's session.
///
/// The domain's A record must already point at the machine.
pub struct CertbotIssuer {
    email: String,
}

impl CertbotIssuer {
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self { email: email.into() }
    }
}

impl CertificateProvisioner for CertbotIssuer {
    async fn issue(&self, session: &impl RemoteSession, domain: &str) -> Result<String> {
        run_required(session, "certificate", &certbot_script(domain, &self.email)).await?;
        Ok(letsencrypt_certificate_path(domain))
    }
}
