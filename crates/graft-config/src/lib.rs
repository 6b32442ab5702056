#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Layered configuration for graft.
//!
//! # Usage
//!
//! ```rust,no_run
//! use graft_config::Config;
//!
//! let loaded = Config::load(None).unwrap();
//! println!("installing into {}", loaded.config.install.root.display());
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment variables** (`GRAFT_INSTALL_ROOT`, `GRAFT_API_BASE_URL`,
//!    `GRAFT_TOKEN`, `GRAFT_LOG_LEVEL`)
//! 2. **Explicit file** passed with `--config`
//! 3. **User** (`~/.graft/config.toml`, or `$GRAFT_HOME/config.toml`)
//! 4. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! This crate has no dependencies on other graft crates. Conversion into
//! installer and logging types happens in the binary.

/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{GRAFT_HOME_ENV, LoadedConfig};
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// See [`loader::load`] for the algorithm.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<LoadedConfig> {
        loader::load(explicit)
    }
}
