//! Named key pairs and the file-backed wallet store.

#[macro_use]
extern crate tracing;

pub mod error;
pub mod store;
pub mod wallet;

pub use error::WalletError;
pub use store::WalletStore;
pub use wallet::Wallet;
