//! Application services: use-case orchestration.
//!
//! Each service module implements a single use-case by composing domain logic
//! with port trait calls. Services import only from `crate::domain` and
//! `crate::application::ports`, never from `crate::infra`, `crate::commands`,
//! or `crate::output`.

pub mod bootstrap;
pub mod connect;
pub mod locks;
pub mod machine;
pub mod worker;

pub use machine::Orchestrator;
pub use worker::Worker;
