//! Chrome DevTools Protocol client.
//!
//! A thin WebSocket layer: outgoing commands are correlated to responses by
//! id, everything else on the socket is a protocol event fanned out to
//! subscribers. Session routing uses the flattened protocol (`sessionId` on
//! the message envelope).

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Synthetic event broadcast when the browser connection goes away.
pub const DISCONNECTED_EVENT: &str = "__cdp.disconnected";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum CdpError {
    #[error("failed to connect to DevTools endpoint {url}: {message}")]
    Connect { url: String, message: String },
    #[error("DevTools command {method} failed: {message}")]
    Command { method: String, message: String },
    #[error("browser connection closed")]
    Disconnected,
}

/// A protocol event, possibly scoped to an attached session.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub session_id: Option<String>,
    pub params: Value,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, CdpError>>>>>;

/// Shared DevTools connection. Cheap to clone behind an `Arc`; commands may
/// be issued concurrently from any task.
pub struct CdpClient {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    events: broadcast::Sender<CdpEvent>,
    connected: Arc<AtomicBool>,
}

impl CdpClient {
    /// Connects to the browser-level DevTools WebSocket endpoint and spawns
    /// the read/write pumps.
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>, CdpError> {
        let (stream, _response) = connect_async(ws_url)
            .await
            .map_err(|e| CdpError::Connect { url: ws_url.to_string(), message: e.to_string() })?;
        let (mut sink, mut source) = stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let pending: Pending = Arc::default();
        let connected = Arc::new(AtomicBool::new(true));

        let client = Arc::new(Self {
            outgoing: outgoing.clone(),
            pending: pending.clone(),
            next_id: AtomicU64::new(0),
            events: events.clone(),
            connected: connected.clone(),
        });

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        Self::route_incoming(text.as_str(), &pending, &events);
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = outgoing.send(Message::Pong(payload));
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }

            connected.store(false, Ordering::SeqCst);
            for (_, waiter) in pending.lock().drain() {
                let _ = waiter.send(Err(CdpError::Disconnected));
            }
            let _ = events.send(CdpEvent {
                method: DISCONNECTED_EVENT.to_string(),
                session_id: None,
                params: Value::Null,
            });
            trace!(target: "bridge::cdp", "devtools socket closed");
        });

        Ok(client)
    }

    /// Sends one command and awaits its response. `session_id` routes the
    /// command to an attached target; `None` addresses the browser itself.
    pub async fn command(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, CdpError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CdpError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut envelope = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            envelope["sessionId"] = json!(session_id);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        trace!(target: "bridge::cdp", id, method, "sending command");
        if self.outgoing.send(Message::text(envelope.to_string())).is_err() {
            self.pending.lock().remove(&id);
            return Err(CdpError::Disconnected);
        }

        rx.await.map_err(|_| CdpError::Disconnected)?
    }

    /// Subscribes to protocol events, including the synthetic
    /// [`DISCONNECTED_EVENT`].
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn route_incoming(text: &str, pending: &Pending, events: &broadcast::Sender<CdpEvent>) {
        let Ok(message) = serde_json::from_str::<Value>(text) else {
            warn!(target: "bridge::cdp", "dropping unparseable devtools frame");
            return;
        };

        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            let Some(waiter) = pending.lock().remove(&id) else { return };
            let outcome = match message.get("error") {
                Some(error) if !error.is_null() => {
                    let method = message
                        .get("method")
                        .and_then(Value::as_str)
                        .unwrap_or("<command>")
                        .to_string();
                    let text = error
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string());
                    Err(CdpError::Command { method, message: text })
                }
                _ => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = waiter.send(outcome);
            return;
        }

        if let Some(method) = message.get("method").and_then(Value::as_str) {
            let event = CdpEvent {
                method: method.to_string(),
                session_id: message
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                params: message.get("params").cloned().unwrap_or(Value::Null),
            };
            let _ = events.send(event);
        }
    }
}
