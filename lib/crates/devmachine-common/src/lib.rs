pub mod api;
pub mod machine;

pub use api::{CreateMachineResult, DesiredState, OperationResult, UpdateMachineResult};
pub use machine::{AppRuntime, Machine, MachineHealth, MachineState, ParseStateError, RepoInfo};
