//! Loads `ProvisioningConfig` from YAML on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::ProvisioningConfig;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "DEVMACHINE_CONFIG";

/// Resolve the config path: explicit flag, then `DEVMACHINE_CONFIG`, then
/// `~/.devmachine/config.yaml`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(val) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(val));
    }
    Ok(devmachine_home()?.join("config.yaml"))
}

/// Load and validate the configuration. A missing file yields the defaults.
///
/// `~` in key and state paths is expanded against the home directory.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or fails validation.
pub fn load(explicit: Option<&Path>) -> Result<ProvisioningConfig> {
    let path = config_path(explicit)?;
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_yaml::from_str::<ProvisioningConfig>(&content)
            .with_context(|| format!("cannot parse {}", path.display()))?
    } else {
        ProvisioningConfig::default()
    };

    config.ssh.private_key_path = expand_home(&config.ssh.private_key_path)?;
    config.ssh.public_key_path = expand_home(&config.ssh.public_key_path)?;
    config.state_dir = Some(match config.state_dir.take() {
        Some(dir) => expand_home(&dir)?,
        None => devmachine_home()?.join("state"),
    });

    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Directory holding machine records and the queue.
///
/// # Errors
///
/// Returns an error if no state directory is configured and the home
/// directory cannot be determined.
pub fn state_dir(config: &ProvisioningConfig) -> Result<PathBuf> {
    match &config.state_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(devmachine_home()?.join("state")),
    }
}

fn devmachine_home() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.join(".devmachine"))
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home =
                dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}
