//! Configuration management for syncq.
//!
//! This module handles loading configuration from `~/.syncq/`.

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{BackendConfig, Config, GeneralConfig, QueueConfig, SessionConfig};
