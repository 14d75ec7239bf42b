//! Host bootstrapping: system packages first, then the tenant application.

pub mod application;
pub mod system;

pub use application::{ApplicationBootstrapper, configure_proxy};
pub use system::bootstrap_system;
