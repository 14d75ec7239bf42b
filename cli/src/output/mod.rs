//! Output formatting module

pub mod json;
pub mod styles;

use console::Term;
use devmachine_common::{Machine, MachineHealth};
use owo_colors::OwoColorize as _;
pub use styles::Styles;

use crate::domain::WorkflowReport;

/// Output context carrying styling and terminal state.
pub struct OutputContext {
    /// Stylesheet for colored output.
    pub styles: Styles,
    /// Whether stdout is a TTY.
    pub is_tty: bool,
    /// Whether to suppress non-error output.
    pub quiet: bool,
}

impl OutputContext {
    /// Create output context based on CLI flags and environment.
    #[must_use]
    pub fn new(no_color: bool, quiet: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let use_colors = !no_color && is_tty && std::env::var("NO_COLOR").is_err();

        let mut styles = Styles::default();
        if use_colors {
            styles.colorize();
        }

        Self {
            styles,
            is_tty,
            quiet,
        }
    }

    /// Print a success message prefixed with `✓`. Suppressed when `quiet`.
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "✓".style(self.styles.success));
        }
    }

    /// Print a warning message prefixed with `⚠`. Suppressed when `quiet`.
    pub fn warn(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "⚠".style(self.styles.warning));
        }
    }

    /// Print an error message prefixed with `✗` to stderr. Never suppressed.
    pub fn error(&self, msg: &str) {
        eprintln!("  {} {msg}", "✗".style(self.styles.error));
    }

    /// Print an info message prefixed with `ℹ`. Suppressed when `quiet`.
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "ℹ".style(self.styles.info));
        }
    }

    /// Print a section header. Suppressed when `quiet`.
    pub fn header(&self, msg: &str) {
        if !self.quiet {
            println!("  {}", msg.style(self.styles.header));
        }
    }

    /// Print a key-value pair with the key dimmed. Suppressed when `quiet`.
    pub fn kv(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {}  {value}", format!("{key:<10}").style(self.styles.dim));
        }
    }

    /// Print every field of `machine` worth showing.
    pub fn machine(&self, machine: &Machine) {
        self.header(&machine.host_name);
        self.kv("id", &machine.id);
        self.kv("owner", &machine.owner_ref);
        self.kv("state", machine.state.as_str());
        if let Some(zone) = &machine.zone {
            self.kv("zone", zone);
        }
        if let Some(ip) = &machine.ip_address {
            self.kv("ip", ip);
        }
        if let Some(domain) = &machine.domain {
            self.kv("url", &format!("https://{domain}"));
        }
        if let Some(runtime) = &machine.app_runtime {
            self.kv("backend", &runtime.backend_project_url);
        }
        if let MachineHealth::Degraded { reason } = &machine.health {
            self.warn(&format!("degraded: {reason}"));
        }
        if let Some(error) = &machine.last_error {
            self.kv("error", error);
        }
    }

    /// Print the failed steps of `report` as warnings.
    pub fn report(&self, report: &WorkflowReport) {
        for step in report.failures() {
            self.warn(&format!(
                "{}: {}",
                step.step,
                step.error.as_deref().unwrap_or("failed")
            ));
        }
    }
}

/// One line per machine for `list`.
#[must_use]
pub fn machine_row(machine: &Machine) -> String {
    let health = if machine.health.is_degraded() { " (degraded)" } else { "" };
    format!(
        "{:<20} {:<24} {:<24}{health}",
        machine.id,
        machine.host_name,
        machine.state.as_str(),
    )
}
