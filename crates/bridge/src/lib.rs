//! The browser-bridge runtime.
//!
//! Two-sided mediation between an untrusted in-page script environment and
//! the trusted local process:
//!
//! - [`provider`] builds the pre-document script that impersonates a wallet
//!   inside every page, including the host-call glue behind
//!   `window.__rpcProxy` and `window.__submitCapture`.
//! - [`dispatch`] answers, signs or forwards every wallet RPC call arriving
//!   from the page.
//! - [`capture`] proxies the third-party capture toolbar: host-side script
//!   fetch, in-page injection, fetch interposition and popup observation.
//! - [`runtime`] launches the headed browser over the DevTools protocol and
//!   wires the three bridges into it before any page loads.

#[macro_use]
extern crate tracing;

pub mod approver;
pub mod assets;
pub mod capture;
pub mod cdp;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod provider;
pub mod runtime;

pub use approver::{ApproverBus, TxRequest};
pub use capture::{CaptureBridge, CaptureEndpoints, InjectOutcome};
pub use dispatch::RpcDispatcher;
pub use error::{BridgeError, DispatchError};
pub use events::SessionEvent;
pub use runtime::{BrowserRuntime, RuntimeConfig};
