//! Config directory layout.
//!
//! Everything dappcap persists lives under a single directory:
//!
//! ```text
//! <config-dir>/
//!   wallets.json      saved key pairs
//!   setup_complete    zero-byte marker, presence implies setup ran
//!   logs/             per-session log files
//! ```

use crate::ConfigError;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config directory location.
pub const CONFIG_DIR_ENV: &str = "DAPPCAP_HOME";

const SETUP_MARKER: &str = "setup_complete";

/// Resolves the config directory: `$DAPPCAP_HOME` if set, otherwise
/// `~/.dappcap`.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".dappcap"))
        .ok_or_else(|| ConfigError::InvalidInput("could not determine home directory".into()))
}

/// Path of the wallet store file.
pub fn wallets_file(config_dir: &Path) -> PathBuf {
    config_dir.join("wallets.json")
}

/// Path of the session log directory.
pub fn logs_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}

/// Whether first-run setup has completed.
pub fn is_setup_complete(config_dir: &Path) -> bool {
    config_dir.join(SETUP_MARKER).exists()
}

/// Records that setup completed by touching the zero-byte marker file.
pub fn mark_setup_complete(config_dir: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::io(e, config_dir))?;
    let marker = config_dir.join(SETUP_MARKER);
    std::fs::write(&marker, []).map_err(|e| ConfigError::io(e, &marker))?;
    debug!(target: "config", path = ?marker, "setup marker written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_marker_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("dappcap");
        assert!(!is_setup_complete(&root));
        mark_setup_complete(&root).unwrap();
        assert!(is_setup_complete(&root));
        // Marker is a zero-byte file.
        assert_eq!(std::fs::metadata(root.join("setup_complete")).unwrap().len(), 0);
    }

    #[test]
    fn layout_paths() {
        let root = Path::new("/tmp/dappcap-test");
        assert_eq!(wallets_file(root), root.join("wallets.json"));
        assert_eq!(logs_dir(root), root.join("logs"));
    }
}
