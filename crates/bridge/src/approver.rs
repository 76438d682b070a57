//! In-process channel arbitrating signing requests.
//!
//! The dispatcher emits a [`TxRequest`] for every signing call while an
//! approver is attached, then suspends until the approver settles it. The
//! approver must eventually call exactly one of [`TxRequest::resolve`] or
//! [`TxRequest::reject`]; double settlement is silently ignored.

use crate::{
    dispatch::{SignAction, SignerContext},
    error::DispatchError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Reply sent back to the suspended dispatch: the value the page receives,
/// or the approver's rejection message.
pub(crate) type ApproverReply = Result<String, String>;

/// A signing call suspended for external arbitration.
pub struct TxRequest {
    /// Monotonically increasing per-session request number.
    pub sequence_id: u64,
    /// The RPC method that triggered the request.
    pub method: String,
    /// Ordered human-readable fields describing what is being signed.
    pub display: Vec<(String, String)>,
    action: SignAction,
    ctx: Arc<SignerContext>,
    reply: Mutex<Option<oneshot::Sender<ApproverReply>>>,
}

impl std::fmt::Debug for TxRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxRequest")
            .field("sequence_id", &self.sequence_id)
            .field("method", &self.method)
            .field("display", &self.display)
            .finish_non_exhaustive()
    }
}

impl TxRequest {
    pub(crate) fn new(
        sequence_id: u64,
        method: impl Into<String>,
        display: Vec<(String, String)>,
        action: SignAction,
        ctx: Arc<SignerContext>,
    ) -> (Self, oneshot::Receiver<ApproverReply>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            sequence_id,
            method: method.into(),
            display,
            action,
            ctx,
            reply: Mutex::new(Some(tx)),
        };
        (request, rx)
    }

    /// Executes the underlying signing action and returns the signature or
    /// transaction hash. Does not settle the request; the approver passes the
    /// value to [`resolve`](Self::resolve) once satisfied.
    pub async fn sign(&self) -> Result<String, DispatchError> {
        self.action.execute(&self.ctx).await
    }

    /// Settles the request with the value the page will receive.
    pub fn resolve(&self, value: impl Into<String>) {
        if let Some(tx) = self.reply.lock().take() {
            let _ = tx.send(Ok(value.into()));
        }
    }

    /// Settles the request with a rejection; the page's promise rejects with
    /// this message.
    pub fn reject(&self, reason: impl Into<String>) {
        if let Some(tx) = self.reply.lock().take() {
            let _ = tx.send(Err(reason.into()));
        }
    }

    /// Whether the request is still awaiting settlement.
    pub fn is_pending(&self) -> bool {
        self.reply.lock().is_some()
    }
}

/// Publish/subscribe channel with a single subject: pending [`TxRequest`]s.
///
/// At most one approver is attached at a time; attaching replaces any
/// previous receiver. The dispatcher only ever asks for the listener count.
#[derive(Clone, Default)]
pub struct ApproverBus {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<TxRequest>>>>,
}

impl ApproverBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an approver, returning the request stream. Any previously
    /// attached approver stops receiving.
    pub fn attach(&self) -> mpsc::UnboundedReceiver<TxRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock() = Some(tx);
        rx
    }

    /// Detaches the current approver, if any.
    pub fn detach(&self) {
        *self.sender.lock() = None;
    }

    /// Number of attached approvers: zero or one.
    pub fn listener_count(&self) -> usize {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(tx) if !tx.is_closed() => 1,
            _ => 0,
        }
    }

    /// Emits a request to the attached approver. If nobody is listening the
    /// request is handed back so the caller can settle it without
    /// arbitration.
    pub(crate) fn emit(&self, request: TxRequest) -> Result<(), TxRequest> {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(request).map_err(|err| err.0),
            None => Err(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_support::signer_context;

    fn request(seq: u64) -> (TxRequest, oneshot::Receiver<ApproverReply>) {
        TxRequest::new(
            seq,
            "personal_sign",
            vec![("message".into(), "hello".into())],
            SignAction::personal_sign_for_test(b"hello"),
            signer_context(),
        )
    }

    #[tokio::test]
    async fn resolve_settles_once() {
        let (req, rx) = request(1);
        assert!(req.is_pending());
        req.resolve("0xSIG");
        // Second settlement of either kind is ignored.
        req.resolve("0xOTHER");
        req.reject("too late");
        assert!(!req.is_pending());
        assert_eq!(rx.await.unwrap(), Ok("0xSIG".to_string()));
    }

    #[tokio::test]
    async fn reject_carries_reason() {
        let (req, rx) = request(2);
        req.reject("User rejected the request");
        assert_eq!(rx.await.unwrap(), Err("User rejected the request".to_string()));
    }

    #[tokio::test]
    async fn bus_counts_single_listener() {
        let bus = ApproverBus::new();
        assert_eq!(bus.listener_count(), 0);

        let mut rx = bus.attach();
        assert_eq!(bus.listener_count(), 1);

        let (req, _reply) = request(3);
        assert!(bus.emit(req).is_ok());
        assert_eq!(rx.recv().await.unwrap().sequence_id, 3);

        bus.detach();
        assert_eq!(bus.listener_count(), 0);
        let (req, _reply) = request(4);
        // With no listener the request comes straight back.
        assert_eq!(bus.emit(req).unwrap_err().sequence_id, 4);
    }

    #[tokio::test]
    async fn dropped_receiver_counts_as_detached() {
        let bus = ApproverBus::new();
        drop(bus.attach());
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn requests_arrive_in_emit_order() {
        let bus = ApproverBus::new();
        let mut rx = bus.attach();
        for seq in [10, 11, 12] {
            let (req, _reply) = request(seq);
            assert!(bus.emit(req).is_ok());
        }
        for seq in [10, 11, 12] {
            assert_eq!(rx.recv().await.unwrap().sequence_id, seq);
        }
    }
}
