use std::path::PathBuf;

/// Errors surfaced by wallet creation and the on-disk store.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The supplied private key is not a 32-byte hex string, or does not
    /// parse into a usable signing key.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    /// The persisted wallet file exists but cannot be parsed. The store never
    /// truncates it; the user decides what to do with the data.
    #[error(
        "wallet store at {path:?} is corrupt ({source}); delete the file and restart to recover"
    )]
    CorruptStore { source: serde_json::Error, path: PathBuf },
    /// Provides path context for store I/O.
    #[error("failed to access wallet store at {path:?}: {source}")]
    Io { source: std::io::Error, path: PathBuf },
}

impl WalletError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io { source, path: path.into() }
    }
}
