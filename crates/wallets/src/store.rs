//! File-backed set of named key pairs.

use crate::{Wallet, WalletError};
use alloy_primitives::Address;
use std::path::{Path, PathBuf};

const STORE_FILE: &str = "wallets.json";

/// On-disk wallet store: a pretty-printed JSON array of wallets.
///
/// The directory is created lazily on first save. A file that exists but
/// cannot be parsed surfaces [`WalletError::CorruptStore`] instead of being
/// silently replaced.
#[derive(Debug, Clone)]
pub struct WalletStore {
    path: PathBuf,
}

impl WalletStore {
    /// A store rooted at `dir`, holding `dir/wallets.json`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { path: dir.as_ref().join(STORE_FILE) }
    }

    /// Reads all persisted wallets. A missing file is an empty store.
    pub fn load(&self) -> Result<Vec<Wallet>, WalletError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(WalletError::io(err, &self.path)),
        };
        serde_json::from_str(&contents)
            .map_err(|source| WalletError::CorruptStore { source, path: self.path.clone() })
    }

    /// Creates a wallet with a random key and persists it.
    pub fn create(&self, name: impl Into<String>) -> Result<Wallet, WalletError> {
        let wallet = Wallet::random(name);
        self.append(wallet.clone())?;
        Ok(wallet)
    }

    /// Imports a wallet from a private key and persists it.
    pub fn import(
        &self,
        name: impl Into<String>,
        private_key: &str,
    ) -> Result<Wallet, WalletError> {
        let wallet = Wallet::from_private_key(name, private_key)?;
        self.append(wallet.clone())?;
        Ok(wallet)
    }

    /// Creates a wallet with a random key that is never written to disk.
    pub fn create_ephemeral(&self) -> Wallet {
        Wallet::random("ephemeral")
    }

    /// Removes the wallet with the given address, if present. Returns whether
    /// anything was deleted.
    pub fn delete(&self, address: Address) -> Result<bool, WalletError> {
        let mut wallets = self.load()?;
        let before = wallets.len();
        wallets.retain(|w| w.address != address);
        if wallets.len() == before {
            return Ok(false);
        }
        self.save(&wallets)?;
        debug!(target: "wallets", %address, "wallet deleted");
        Ok(true)
    }

    /// The store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, wallet: Wallet) -> Result<(), WalletError> {
        let mut wallets = self.load()?;
        wallets.push(wallet);
        self.save(&wallets)
    }

    fn save(&self, wallets: &[Wallet]) -> Result<(), WalletError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| WalletError::io(e, dir))?;
        }
        let json = serde_json::to_string_pretty(wallets)
            .map_err(|source| WalletError::CorruptStore { source, path: self.path.clone() })?;
        std::fs::write(&self.path, json).map_err(|e| WalletError::io(e, &self.path))
    }
}
