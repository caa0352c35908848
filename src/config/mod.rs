//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for worker supervision and
//! per-task option overrides.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{BrainConfig, TaskOverride, WorkerConfig};
