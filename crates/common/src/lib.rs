//! driftless common library
//!
//! Shared error taxonomy, lifecycle vocabulary, desired-state records and
//! client configuration for the driftless convergence engine.

pub mod config;
pub mod error;
pub mod keyed;
pub mod spec;
pub mod types;

pub use config::{ClientConfig, PollConfig, TimeoutConfig};
pub use error::{Error, Result};
pub use keyed::Keyed;
pub use spec::*;
pub use types::*;

/// driftless version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default config file location
pub fn default_config_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".driftless")
        .join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
