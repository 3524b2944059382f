//! Configuration for db-backup
//!
//! This module handles loading the optional TOML file and merging it with
//! command-line values into validated `Settings`.
//!
//! ## Precedence
//!
//! Settings are applied in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. The TOML file given with `--config`
//! 3. Command-line flags and their environment variables
//!
//! ## Example Usage
//!
//! ```no_run
//! use db_backup::config::{self, Overrides, Settings};
//!
//! let file = config::load_config("db-backup.toml")?;
//! let settings = Settings::resolve(file, Overrides::default())?;
//! println!("Destinations: {:?}", settings.destinations);
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{
    load_config, AzureSettings, ConfigError, Overrides, Result, Settings, SUPPORTED_BACKENDS,
};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
