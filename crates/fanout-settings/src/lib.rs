//! # fanout-settings
//!
//! Configuration for a fanout worker, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`FanoutSettings::default()`]
//! 2. **Settings file**: optional JSON file, deep-merged over defaults
//! 3. **Environment variables**: `REDIS_*`, `WS_CONNECTIONS_KEY`,
//!    `GRACEFUL_SHUTDOWN_*`, `FANOUT_*` (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path};
pub use types::*;
