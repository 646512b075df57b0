//! Configuration loading and management.
//!
//! - [`types`]: top-level `Config`, `DatabaseConfig`, `ChatConfig` and loading
//! - [`limits`]: per-account and per-character capacity limits

mod limits;
mod types;

pub use limits::StorageLimits;
pub use types::{ChatConfig, Config, ConfigError, DatabaseConfig};
