//! Session-wide event bus.

use tokio::sync::broadcast;

/// Capacity of the session event channel. Slow subscribers lag rather than
/// block the bridges.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the bridges during a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A capture submission went through the host proxy; carries the raw
    /// upstream response body.
    CaptureSubmitted(String),
    /// The upstream response yielded a claim URL.
    CaptureClaimUrl(String),
    /// The upstream response yielded the identifier for a follow-up capture.
    CaptureNextId(String),
    /// A popup or navigation in the browser context resolved to a
    /// capture-platform URL.
    CaptureFigmaUrl(String),
    /// The browser closed, by the user or by the host. Terminal.
    BrowserClosed,
}

impl SessionEvent {
    /// The wire-level event name, used in session logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CaptureSubmitted(_) => "capture:submitted",
            Self::CaptureClaimUrl(_) => "capture:claimUrl",
            Self::CaptureNextId(_) => "capture:nextId",
            Self::CaptureFigmaUrl(_) => "capture:figmaUrl",
            Self::BrowserClosed => "browser:closed",
        }
    }
}

/// Creates the session event channel.
pub fn channel() -> (broadcast::Sender<SessionEvent>, broadcast::Receiver<SessionEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}
