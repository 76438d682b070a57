//! Known chains and user-constructed custom chains.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt};
use url::Url;

/// A chain the injected wallet can claim to be connected to.
///
/// The hex id is always derived from [`Chain::id`], so the two cannot drift
/// apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    /// Numeric chain id, always non-zero.
    pub id: u64,
    /// Human-readable chain name.
    pub name: Cow<'static, str>,
    /// JSON-RPC endpoint used for forwarded calls.
    pub rpc: Cow<'static, str>,
}

/// Built-in chains offered by the chain menu, in display order.
pub const BUILTIN_CHAINS: &[Chain] = &[
    Chain::known(1, "Ethereum", "https://eth.llamarpc.com"),
    Chain::known(10, "Optimism", "https://mainnet.optimism.io"),
    Chain::known(56, "BNB Chain", "https://bsc-dataseed.bnbchain.org"),
    Chain::known(137, "Polygon", "https://polygon-rpc.com"),
    Chain::known(8453, "Base", "https://mainnet.base.org"),
    Chain::known(42161, "Arbitrum", "https://arb1.arbitrum.io/rpc"),
    Chain::known(43114, "Avalanche", "https://api.avax.network/ext/bc/C/rpc"),
];

impl Chain {
    const fn known(id: u64, name: &'static str, rpc: &'static str) -> Self {
        Self { id, name: Cow::Borrowed(name), rpc: Cow::Borrowed(rpc) }
    }

    /// Constructs a custom chain from user input.
    ///
    /// The id must be non-zero and the RPC endpoint an absolute http(s) URL.
    pub fn custom(
        id: u64,
        name: impl Into<String>,
        rpc: impl AsRef<str>,
    ) -> Result<Self, ConfigError> {
        if id == 0 {
            return Err(ConfigError::InvalidInput("chain id must be a positive integer".into()));
        }
        let rpc = rpc.as_ref();
        let url = Url::parse(rpc)
            .map_err(|e| ConfigError::InvalidInput(format!("invalid RPC URL {rpc:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidInput(format!(
                "RPC URL must use http or https, got {:?}",
                url.scheme()
            )));
        }
        Ok(Self { id, name: Cow::Owned(name.into()), rpc: Cow::Owned(url.to_string()) })
    }

    /// Looks up a built-in chain by its numeric id.
    pub fn find_by_id(id: u64) -> Option<&'static Self> {
        BUILTIN_CHAINS.iter().find(|c| c.id == id)
    }

    /// The chain id as a `0x`-prefixed lowercase hex string, e.g. `0x89`.
    pub fn hex_id(&self) -> String {
        format!("0x{:x}", self.id)
    }

    /// The chain id as a decimal string, the `net_version` wire format.
    pub fn id_string(&self) -> String {
        self.id.to_string()
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
