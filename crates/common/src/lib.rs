//! Wireplane Common Library
//!
//! Shared types, error taxonomy, and network helpers for the wireplane
//! control plane.

pub mod error;
pub mod net;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{ClientRecord, ServerConfig};

/// Wireplane version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store directory
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".wireplane")
}

/// Default identity database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("identity.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
