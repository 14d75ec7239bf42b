//! Unit tests for the devmachine CLI
//!
//! These tests drive the orchestrator against in-memory fakes and run fast
//! without external I/O.

mod create_pipeline;
mod helpers;
mod shared_state;
mod teardown;
