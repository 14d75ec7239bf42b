//! Application context: unified state passed to every command handler.
//!
//! Adding a new cross-cutting concern requires only one field change here;
//! command signatures stay the same.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::application::services::Orchestrator;
use crate::domain::ProvisioningConfig;
use crate::infra;
use crate::infra::providers::CloudProvisioners;
use crate::infra::queue::FileTaskQueue;
use crate::infra::secrets::ProviderSecrets;
use crate::infra::store::FileMachineStore;
use crate::output::{OutputContext, json};

/// The orchestrator as wired for the command line.
pub type CliOrchestrator = Orchestrator<CloudProvisioners, FileMachineStore, FileTaskQueue>;

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable JSON output mode.
    pub json: bool,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    /// Output rendering options.
    pub output: OutputFlags,
    /// Skip interactive prompts (also set by `CI` / `DEVMACHINE_YES` env vars).
    pub yes: bool,
    /// Explicit config file, overriding `DEVMACHINE_CONFIG`.
    pub config: Option<PathBuf>,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    /// Loaded and validated provisioning configuration.
    pub config: ProvisioningConfig,
    /// Root of the machine store and task queue.
    pub state_dir: PathBuf,
    /// When `true`, skip interactive prompts and use defaults.
    pub non_interactive: bool,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub fn new(flags: &AppFlags) -> Result<Self> {
        let ci_env = std::env::var("CI").is_ok() || std::env::var("DEVMACHINE_YES").is_ok();
        let non_interactive = flags.yes || ci_env;

        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };

        let config = infra::config::load(flags.config.as_deref())?;
        let state_dir = infra::config::state_dir(&config)?;

        Ok(Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            mode,
            config,
            state_dir,
            non_interactive,
        })
    }

    /// Returns `true` when JSON output mode is active.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Wire the production orchestrator.
    ///
    /// Provider credentials are read from the environment now but only
    /// required when a provider is actually called.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be read or an HTTP client
    /// cannot be built.
    pub fn orchestrator(&self) -> Result<CliOrchestrator> {
        let secrets = ProviderSecrets::from_env()?;
        let providers = CloudProvisioners::new(&self.config, secrets)?;
        Ok(Orchestrator::new(
            providers,
            FileMachineStore::new(&self.state_dir),
            FileTaskQueue::new(&self.state_dir),
            self.config.clone(),
        ))
    }

    /// Report a failed operation in the active output mode, then fail.
    ///
    /// # Errors
    ///
    /// Always returns an error carrying `message`.
    pub fn fail(&self, message: &str, code: &str) -> Result<()> {
        if self.is_json() {
            println!("{}", json::format_error(message, code)?);
        }
        anyhow::bail!("{message}")
    }

    /// Ask the user for confirmation.
    ///
    /// When `non_interactive` is `true` (CI, `--yes` flag, or `DEVMACHINE_YES`
    /// env), returns `default` immediately without prompting.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails.
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.non_interactive {
            return Ok(default);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?;
        Ok(confirmed)
    }
}
