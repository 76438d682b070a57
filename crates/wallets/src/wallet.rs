use crate::WalletError;
use alloy_primitives::{Address, hex};
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};

/// A named key pair.
///
/// The address is always the one derived from the private key, and the key is
/// stored in canonical form: `0x` followed by 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Display name chosen by the user.
    pub name: String,
    /// 20-byte account address derived from the key.
    pub address: Address,
    /// 32-byte private key as `0x`-prefixed lowercase hex.
    #[serde(rename = "privateKey")]
    pub private_key: String,
}

impl Wallet {
    /// Creates a wallet with a freshly generated random key.
    pub fn random(name: impl Into<String>) -> Self {
        let signer = PrivateKeySigner::random();
        Self {
            name: name.into(),
            address: signer.address(),
            private_key: hex::encode_prefixed(signer.to_bytes()),
        }
    }

    /// Creates a wallet from a user-supplied private key.
    ///
    /// Accepts upper- or lowercase hex with a `0x` prefix and normalizes to
    /// the canonical lowercase form.
    pub fn from_private_key(
        name: impl Into<String>,
        private_key: &str,
    ) -> Result<Self, WalletError> {
        let key = private_key.trim();
        if !is_canonical_key_format(key) {
            return Err(WalletError::InvalidPrivateKey(
                "expected 0x followed by 64 hex characters".into(),
            ));
        }
        let signer: PrivateKeySigner =
            key.parse().map_err(|e| WalletError::InvalidPrivateKey(format!("{e}")))?;
        Ok(Self {
            name: name.into(),
            address: signer.address(),
            private_key: key.to_lowercase(),
        })
    }

    /// The signing key backing this wallet.
    pub fn signer(&self) -> Result<PrivateKeySigner, WalletError> {
        self.private_key.parse().map_err(|e| WalletError::InvalidPrivateKey(format!("{e}")))
    }

    /// The checksummed address string handed to the injected provider.
    pub fn address_string(&self) -> String {
        self.address.to_checksum(None)
    }
}

/// `^0x[0-9a-fA-F]{64}$`, without pulling in a regex for three checks.
fn is_canonical_key_format(key: &str) -> bool {
    key.len() == 66
        && key.starts_with("0x")
        && key[2..].bytes().all(|b| b.is_ascii_hexdigit())
}
