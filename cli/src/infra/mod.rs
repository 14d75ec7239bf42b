//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, the
//! provider REST clients, the remote shell, and the file-backed store and
//! queue.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` or `crate::output` are forbidden.

pub mod backend_project;
pub mod certificate;
pub mod command_runner;
pub mod compute;
pub mod config;
pub mod dns;
pub mod fs;
pub mod http;
pub mod lock;
pub mod providers;
pub mod queue;
pub mod secrets;
pub mod ssh;
pub mod store;
