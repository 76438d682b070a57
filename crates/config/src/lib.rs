//! Configuration for dappcap: known chains, the config directory layout and
//! the per-session log file.

#[macro_use]
extern crate tracing;

pub mod chains;
pub mod logs;
pub mod paths;

pub use chains::{BUILTIN_CHAINS, Chain};
pub use logs::SessionLog;

use std::path::PathBuf;

/// Errors produced while assembling or persisting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// User-supplied value that cannot be turned into a valid config entry.
    #[error("{0}")]
    InvalidInput(String),
    /// Provides path context for config-dir I/O.
    #[error("failed to access {path:?}: {source}")]
    Io { source: std::io::Error, path: PathBuf },
}

impl ConfigError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io { source, path: path.into() }
    }
}
