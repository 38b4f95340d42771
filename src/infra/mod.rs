//! Infrastructure - configuration, metrics, and the item registry mirror
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `registry` - In-memory mirror of the external item registry

pub mod config;
pub mod metrics;
pub mod registry;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
pub use registry::{ItemRegistry, ModelError};
