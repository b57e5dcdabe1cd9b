//! notify-engine library crate.
//!
//! Multi-channel notification delivery: push channels with queued retries,
//! pull feeds, template rendering and user preferences.

pub mod channel;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod model;
pub mod registry;
pub mod render;
pub mod service;
pub mod services;
pub mod store;

pub use error::{Error, Result};
