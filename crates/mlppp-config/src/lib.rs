#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Layered configuration for the mlppp daemon.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mlppp_config::Config;
//!
//! let resolved = Config::load(None).unwrap();
//! println!("idle timeout: {}s", resolved.config.bundle.idle_timeout);
//! ```
//!
//! # Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Explicit** (`mlpppd --config <file>`)
//! 2. **User** (`~/.mlppp/config.toml`, else `$MLPPP_HOME/config.toml`)
//! 3. **System** (`/etc/mlppp/config.toml`)
//! 4. **Environment variables** (`MLPPP_*`), fallback only
//! 5. **Embedded defaults** (`defaults.toml`)
//!
//! This crate depends on no other mlppp crate. Link types, devices, gateways
//! and filter rules are validated here as text and converted to domain types
//! by the daemon.

/// Environment variable fallbacks.
pub mod env;
/// Configuration error types.
pub mod error;
/// File discovery and layered loading.
pub mod loader;
/// Layered merging with source tracking.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{LoadOptions, ResolvedConfig};
pub use merge::ConfigLayer;
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain for this process.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any file is malformed, the explicit file
    /// is missing, or the result fails validation.
    pub fn load(explicit_file: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load_with(&LoadOptions::from_env(explicit_file)?)
    }
}
