//! Per-step results for workflows that mix best-effort and authoritative steps.

use devmachine_common::MachineHealth;
use serde::Serialize;

/// Result of one step: whether it ran, and whether it worked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub attempted: bool,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    /// Step had nothing to act on. Counts as success.
    #[must_use]
    pub fn skipped(step: &str) -> Self {
        Self {
            step: step.to_string(),
            attempted: false,
            ok: true,
            error: None,
        }
    }

    #[must_use]
    pub fn succeeded(step: &str) -> Self {
        Self {
            step: step.to_string(),
            attempted: true,
            ok: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(step: &str, error: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            attempted: true,
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Aggregate of step outcomes for one workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowReport {
    pub steps: Vec<StepOutcome>,
}

impl WorkflowReport {
    pub fn record(&mut self, outcome: StepOutcome) {
        self.steps.push(outcome);
    }

    pub fn extend(&mut self, other: WorkflowReport) {
        self.steps.extend(other.steps);
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.ok)
    }

    /// Whether the named step ran at all.
    #[must_use]
    pub fn attempted(&self, step: &str) -> bool {
        self.steps.iter().any(|s| s.step == step && s.attempted)
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.ok)
    }

    /// One line summarising the failed steps, or `None` when clean.
    #[must_use]
    pub fn failure_summary(&self) -> Option<String> {
        let parts: Vec<String> = self
            .failures()
            .map(|s| match &s.error {
                Some(e) => format!("{}: {e}", s.step),
                None => s.step.clone(),
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    /// Health implied by this report.
    #[must_use]
    pub fn health(&self) -> MachineHealth {
        match self.failure_summary() {
            Some(reason) => MachineHealth::Degraded { reason },
            None => MachineHealth::Healthy,
        }
    }
}

/// Result of a resume.
#[derive(Debug, Clone)]
pub struct ResumeOutcome {
    pub ip_address: String,
    pub ip_changed: bool,
    pub report: WorkflowReport,
    pub health: MachineHealth,
}

impl ResumeOutcome {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.health.is_degraded()
    }
}
