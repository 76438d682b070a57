use std::path::PathBuf;

/// Errors crossing the provider boundary from the RPC dispatcher.
///
/// Whatever the underlying cause, the page only ever sees the rendered
/// message as a rejected promise.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Malformed request parameters.
    #[error("invalid request: {0}")]
    InvalidInput(String),
    /// Network failure or a non-empty `error` member in the upstream
    /// JSON-RPC response.
    #[error("upstream RPC call failed: {0}")]
    UpstreamRpcFailed(String),
    /// The approver rejected a signing request.
    #[error("{0}")]
    SigningRejected(String),
    /// The signing key refused the payload.
    #[error(transparent)]
    Signer(#[from] alloy_signer::Error),
}

/// Errors raised by the browser runtime and the capture bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No usable browser binary, or the browser never produced a DevTools
    /// endpoint.
    #[error("failed to launch browser {binary:?}: {message}")]
    LaunchFailed { binary: PathBuf, message: String },
    /// The DevTools connection failed or returned a protocol-level error.
    #[error(transparent)]
    Cdp(#[from] crate::cdp::CdpError),
    /// The browser went away mid-session.
    #[error("browser disconnected")]
    BrowserDisconnected,
    /// The capture script could not be retrieved. Never reaches the page.
    #[error("failed to fetch capture script: {0}")]
    ScriptFetchFailed(String),
    /// A proxied capture submission did not reach the upstream endpoint.
    #[error("capture submission failed: {0}")]
    CaptureSubmitFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
