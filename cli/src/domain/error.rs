//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use devmachine_common::MachineState;
use thiserror::Error;

// ── Machine errors ────────────────────────────────────────────────────────────

/// Errors about a machine record and its lifecycle.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Machine '{0}' not found.")]
    NotFound(String),

    #[error("Owner '{0}' already has a machine. Delete it before creating another.")]
    AlreadyExists(String),

    #[error("Illegal state transition {from} -> {to}.")]
    InvalidTransition { from: MachineState, to: MachineState },

    #[error("Machine '{id}' is {actual}, expected {expected}.")]
    UnexpectedState {
        id: String,
        expected: MachineState,
        actual: MachineState,
    },

    #[error("Machine '{id}' violates an invariant: {detail}")]
    InvariantViolation { id: String, detail: String },

    #[error("Invalid machine ID: {0}")]
    InvalidId(String),

    #[error("Invalid owner reference '{0}': must contain at least one letter or digit")]
    InvalidOwner(String),
}

// ── Provisioning errors ───────────────────────────────────────────────────────

/// Failures that abort a creation phase.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("No zone available: compute creation failed in every zone ({tried})")]
    NoZoneAvailable { tried: String },

    #[error("Host {ip} unreachable after {attempts} connection attempts")]
    Unreachable { ip: String, attempts: u32 },

    #[error("Bootstrap step '{step}' failed with exit code {exit_code}: {stderr}")]
    Bootstrap {
        step: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Machine '{id}' is missing {field}")]
    MissingField { id: String, field: &'static str },

    #[error("Unsupported repository URL '{0}': only https clone URLs are accepted")]
    UnsupportedRepoUrl(String),

    #[error("Could not parse output of '{step}': {detail}")]
    UnexpectedOutput { step: String, detail: String },
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors raised by provisioning configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration must list at least one zone")]
    NoZones,

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing credential {0}. Set it in the environment.")]
    MissingSecret(&'static str),
}
