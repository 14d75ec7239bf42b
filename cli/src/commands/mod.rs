//! Command implementations

pub mod create;
pub mod delete;
pub mod power;
pub mod status;
pub mod version;
pub mod worker;
