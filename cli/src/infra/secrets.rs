//! Provider credentials loaded from the environment via `envy`.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::ConfigError;

/// Prefix of every credential variable.
pub const ENV_PREFIX: &str = "DEVMACHINE_";

/// API credentials; never written to disk by this program.
///
/// Each field maps to `DEVMACHINE_<FIELD>`:
///   - `DEVMACHINE_COMPUTE_TOKEN` OAuth access token for the compute API
///   - `DEVMACHINE_DNS_TOKEN`     DNS provider API token
///   - `DEVMACHINE_BACKEND_TOKEN` backend platform management token
#[derive(Default, Deserialize)]
pub struct ProviderSecrets {
    pub compute_token: Option<String>,
    pub dns_token: Option<String>,
    pub backend_token: Option<String>,
}

impl std::fmt::Debug for ProviderSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("ProviderSecrets")
            .field("compute_token", &shown(&self.compute_token))
            .field("dns_token", &shown(&self.dns_token))
            .field("backend_token", &shown(&self.backend_token))
            .finish()
    }
}

impl ProviderSecrets {
    /// Read the `DEVMACHINE_*` variables. Missing variables stay `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but not valid unicode.
    pub fn from_env() -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env()
            .context("reading DEVMACHINE_* credentials from the environment")
    }

    /// Return a credential or explain which variable to set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingSecret` when the value is unset or blank.
    pub fn require<'a>(value: &'a Option<String>, variable: &'static str) -> Result<&'a str, ConfigError> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingSecret(variable))
    }
}
