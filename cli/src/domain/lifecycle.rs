//! Machine state machine.
//!
//! Pure transition rules. The orchestrator is the only caller that mutates
//! `Machine::state`, and it always goes through [`transition`].

use devmachine_common::{Machine, MachineState};

use crate::domain::error::MachineError;

/// Returns `true` when `from -> to` is an edge of the lifecycle graph.
#[must_use]
pub fn is_legal_transition(from: MachineState, to: MachineState) -> bool {
    use MachineState::{
        CreatingInfrastructure, Failed, InfrastructureReady, Running, SettingUpApplication,
        Suspended,
    };
    matches!(
        (from, to),
        (CreatingInfrastructure, InfrastructureReady)
            | (InfrastructureReady, SettingUpApplication)
            | (SettingUpApplication, Running)
            | (CreatingInfrastructure | InfrastructureReady | SettingUpApplication, Failed)
            | (Running, Suspended)
            | (Suspended, Running)
    )
}

/// Move `machine` to `to`, bumping `updated_at`.
///
/// # Errors
///
/// Returns `MachineError::InvalidTransition` if the edge is not legal; the
/// machine is left untouched in that case.
pub fn transition(machine: &mut Machine, to: MachineState) -> Result<(), MachineError> {
    if !is_legal_transition(machine.state, to) {
        return Err(MachineError::InvalidTransition {
            from: machine.state,
            to,
        });
    }
    machine.state = to;
    machine.touch();
    Ok(())
}

/// Precondition check used before every workflow.
///
/// # Errors
///
/// Returns `MachineError::UnexpectedState` when the machine is not in `expected`.
pub fn expect_state(machine: &Machine, expected: MachineState) -> Result<(), MachineError> {
    if machine.state == expected {
        Ok(())
    } else {
        Err(MachineError::UnexpectedState {
            id: machine.id.clone(),
            expected,
            actual: machine.state,
        })
    }
}

/// Check the field invariants that must hold once a state is persisted.
///
/// `ip_address` and `domain` travel together, and a running machine has both.
/// `require_runtime` is set when the machine was created with repository
/// credentials, in which case a running machine must also carry `app_runtime`.
///
/// # Errors
///
/// Returns `MachineError::InvariantViolation` describing the first broken rule.
pub fn check_invariants(machine: &Machine, require_runtime: bool) -> Result<(), MachineError> {
    let violation = |detail: &str| MachineError::InvariantViolation {
        id: machine.id.clone(),
        detail: detail.to_string(),
    };

    if machine.ip_address.is_some() != machine.domain.is_some() {
        return Err(violation("ip address and domain must be set together"));
    }
    let needs_network = matches!(
        machine.state,
        MachineState::InfrastructureReady | MachineState::Running
    );
    if needs_network && machine.ip_address.is_none() {
        return Err(violation("ip address and domain are required in this state"));
    }
    if machine.state == MachineState::Running && require_runtime && machine.app_runtime.is_none() {
        return Err(violation("running machine has no app runtime"));
    }
    Ok(())
}
