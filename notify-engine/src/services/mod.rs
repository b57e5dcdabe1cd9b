//! Service wiring.

pub mod container;

pub use container::{DEFAULT_SHUTDOWN_TIMEOUT, ServiceContainer};
