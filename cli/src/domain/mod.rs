//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod outcome;
pub mod recipe;
pub mod task;

pub use config::ProvisioningConfig;
pub use context::{PhaseContext, SshCredentials};
pub use error::{ConfigError, MachineError, ProvisionError};
pub use lifecycle::{check_invariants, expect_state, is_legal_transition, transition};
pub use outcome::{ResumeOutcome, StepOutcome, WorkflowReport};
pub use task::{MachineTask, TaskKind};
