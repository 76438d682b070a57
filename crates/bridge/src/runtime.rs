//! Headed-browser runtime.
//!
//! Launches Chrome/Chromium with a throwaway profile, connects over the
//! DevTools protocol and wires the three bridges into the context before any
//! page loads: the host-call binding, the pre-document provider script and
//! the popup observer all land on every target before it resumes.

use crate::{
    capture::CaptureBridge,
    cdp::{CdpClient, CdpError, DISCONNECTED_EVENT},
    dispatch::RpcDispatcher,
    error::BridgeError,
    events::SessionEvent,
    provider::DISPATCH_BINDING,
};
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    path::PathBuf,
    process::Stdio,
    sync::{Arc, LazyLock, atomic::{AtomicBool, Ordering}},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    sync::broadcast,
};

/// Default viewport.
pub const WINDOW_SIZE: (u32, u32) = (1440, 900);

/// How long the browser gets to print its DevTools endpoint.
const ENDPOINT_WAIT: Duration = Duration::from_secs(30);

/// How long the first navigation may take to reach DOM-ready before the
/// session continues anyway.
const DOM_READY_WAIT: Duration = Duration::from_secs(30);

static DEVTOOLS_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DevTools listening on (ws://\S+)").unwrap());

/// Launch parameters for one session.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Chrome/Chromium binary to launch.
    pub browser_binary: PathBuf,
    /// URL the main page navigates to once the bridges are wired.
    pub start_url: String,
    /// Pre-document script installed on every target; built by
    /// [`crate::provider::build_init_script`].
    pub init_script: String,
}

/// Handle to an attached page, sufficient to evaluate script in it.
#[derive(Clone)]
pub struct PageHandle {
    cdp: Arc<CdpClient>,
    session_id: String,
}

impl PageHandle {
    /// Evaluates an expression in the page, surfacing in-page exceptions as
    /// errors.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, CdpError> {
        let result = self
            .cdp
            .command(
                Some(&self.session_id),
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;
        if let Some(exception) = result.get("exceptionDetails").filter(|e| !e.is_null()) {
            let message = exception
                .pointer("/exception/description")
                .or_else(|| exception.pointer("/text"))
                .and_then(Value::as_str)
                .unwrap_or("script threw")
                .to_string();
            return Err(CdpError::Command { method: "Runtime.evaluate".into(), message });
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }
}

/// A host call arriving through the DevTools binding.
#[derive(Debug, Deserialize)]
struct BindingPayload {
    id: u64,
    kind: String,
    #[serde(default)]
    payload: Value,
}

struct RuntimeInner {
    cdp: Arc<CdpClient>,
    dispatcher: Arc<RpcDispatcher>,
    capture: Arc<CaptureBridge>,
    events: broadcast::Sender<SessionEvent>,
    init_script: String,
    /// targetId -> sessionId for attached page targets.
    sessions: Mutex<HashMap<String, String>>,
    attach_notify: tokio::sync::Notify,
    main_target: Mutex<Option<String>>,
    closed: AtomicBool,
}

/// Owns the browser process and the DevTools connection for one session.
pub struct BrowserRuntime {
    inner: Arc<RuntimeInner>,
    child: Mutex<Child>,
    // Held for the browser's lifetime; the profile is wiped on drop.
    _profile_dir: tempfile::TempDir,
    main_session: String,
}

impl BrowserRuntime {
    /// Launches the browser and wires the bridges.
    ///
    /// Ordering matters: auto-attach (with `waitForDebuggerOnStart`) is
    /// armed before the first page target exists, and every page target gets
    /// the binding plus the pre-document script before it resumes. Both
    /// host-callable surfaces therefore exist before any page script runs,
    /// on the first page and on every popup.
    pub async fn launch(
        config: RuntimeConfig,
        dispatcher: Arc<RpcDispatcher>,
        capture: Arc<CaptureBridge>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Result<Self, BridgeError> {
        let profile_dir = tempfile::Builder::new().prefix("dappcap-profile-").tempdir()?;

        let mut child = Command::new(&config.browser_binary)
            .args(browser_args(profile_dir.path().to_string_lossy().as_ref()))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::LaunchFailed {
                binary: config.browser_binary.clone(),
                message: e.to_string(),
            })?;

        let stderr = child.stderr.take().expect("stderr was piped");
        let ws_url = tokio::time::timeout(ENDPOINT_WAIT, devtools_endpoint(stderr))
            .await
            .map_err(|_| BridgeError::LaunchFailed {
                binary: config.browser_binary.clone(),
                message: "browser never announced a DevTools endpoint".into(),
            })?
            .ok_or_else(|| BridgeError::LaunchFailed {
                binary: config.browser_binary.clone(),
                message: "browser exited before announcing a DevTools endpoint".into(),
            })?;
        info!(target: "bridge::runtime", %ws_url, "browser launched");

        let cdp = CdpClient::connect(&ws_url).await?;
        let inner = Arc::new(RuntimeInner {
            cdp: cdp.clone(),
            dispatcher,
            capture,
            events,
            init_script: config.init_script.clone(),
            sessions: Mutex::new(HashMap::new()),
            attach_notify: tokio::sync::Notify::new(),
            main_target: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        // The pump must be listening before any target can attach.
        let cdp_events = cdp.subscribe();
        tokio::spawn(event_pump(inner.clone(), cdp_events));

        cdp.command(None, "Target.setDiscoverTargets", json!({ "discover": true })).await?;
        cdp.command(
            None,
            "Target.setAutoAttach",
            json!({ "autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true }),
        )
        .await?;

        // Pages that existed before auto-attach (the initial tab) still sit
        // at about:blank; attach and instrument them by hand.
        let targets = cdp.command(None, "Target.getTargets", json!({})).await?;
        if let Some(infos) = targets.get("targetInfos").and_then(Value::as_array) {
            for info in infos {
                if info["type"] == "page"
                    && let Some(target_id) = info["targetId"].as_str()
                {
                    attach_existing(&inner, target_id).await?;
                }
            }
        }

        let created =
            cdp.command(None, "Target.createTarget", json!({ "url": "about:blank" })).await?;
        let main_target = created["targetId"]
            .as_str()
            .ok_or(CdpError::Command {
                method: "Target.createTarget".into(),
                message: "no targetId in response".into(),
            })?
            .to_string();
        *inner.main_target.lock() = Some(main_target.clone());

        let main_session = wait_for_session(&inner, &main_target).await?;

        let runtime = Self {
            inner: inner.clone(),
            child: Mutex::new(child),
            _profile_dir: profile_dir,
            main_session,
        };
        runtime.navigate(&config.start_url).await?;
        Ok(runtime)
    }

    /// Navigates the main page and waits for DOM-ready. A slow page logs a
    /// warning instead of failing the session.
    async fn navigate(&self, url: &str) -> Result<(), BridgeError> {
        let mut events = self.inner.cdp.subscribe();
        let session = self.main_session.clone();
        self.inner
            .cdp
            .command(Some(&session), "Page.navigate", json!({ "url": url }))
            .await?;

        let dom_ready = async {
            loop {
                match events.recv().await {
                    Ok(event)
                        if event.method == "Page.domContentEventFired"
                            && event.session_id.as_deref() == Some(session.as_str()) =>
                    {
                        break;
                    }
                    Ok(event) if event.method == DISCONNECTED_EVENT => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        if tokio::time::timeout(DOM_READY_WAIT, dom_ready).await.is_err() {
            warn!(target: "bridge::runtime", url, "page did not reach DOM-ready in time");
        }
        Ok(())
    }

    /// The main page.
    pub fn page(&self) -> PageHandle {
        PageHandle { cdp: self.inner.cdp.clone(), session_id: self.main_session.clone() }
    }

    /// Injects the capture toolbar into the main page.
    pub async fn inject_toolbar(&self) -> crate::InjectOutcome {
        self.inner.capture.inject_toolbar(&self.page()).await
    }

    /// Whether the browser is still attached.
    pub fn is_alive(&self) -> bool {
        self.inner.cdp.is_connected() && !self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes the browser. Idempotent; also emits the terminal session event
    /// unless the browser already went away on its own.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target: "bridge::runtime", "closing browser");
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            self.inner.cdp.command(None, "Browser.close", json!({})),
        )
        .await;
        let _ = self.child.lock().start_kill();
        let _ = self.inner.events.send(SessionEvent::BrowserClosed);
    }
}

/// Flags for a headed, instrumentable browser with a clean profile.
fn browser_args(profile_dir: &str) -> Vec<String> {
    vec![
        "--remote-debugging-port=0".into(),
        format!("--user-data-dir={profile_dir}"),
        format!("--window-size={},{}", WINDOW_SIZE.0, WINDOW_SIZE.1),
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--disable-background-networking".into(),
        "--disable-sync".into(),
    ]
}

/// Scans browser stderr for the DevTools endpoint announcement.
async fn devtools_endpoint(stderr: tokio::process::ChildStderr) -> Option<String> {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(url) = parse_devtools_line(&line) {
            return Some(url);
        }
    }
    None
}

fn parse_devtools_line(line: &str) -> Option<String> {
    DEVTOOLS_LINE_RE.captures(line).map(|captures| captures[1].to_string())
}

/// Attaches a pre-existing page target. The resulting `attachedToTarget`
/// event routes through the pump, which instruments the session like any
/// auto-attached one.
async fn attach_existing(inner: &Arc<RuntimeInner>, target_id: &str) -> Result<(), BridgeError> {
    inner
        .cdp
        .command(
            None,
            "Target.attachToTarget",
            json!({ "targetId": target_id, "flatten": true }),
        )
        .await?;
    Ok(())
}

/// Instruments one attached page session: protocol domains, the host-call
/// binding and the pre-document provider script, then resumes the target if
/// it is paused waiting for us.
async fn setup_session(
    inner: &Arc<RuntimeInner>,
    session_id: &str,
    waiting: bool,
) -> Result<(), BridgeError> {
    let cdp = &inner.cdp;
    let session = Some(session_id);
    cdp.command(session, "Page.enable", json!({})).await?;
    cdp.command(session, "Runtime.enable", json!({})).await?;
    cdp.command(session, "Runtime.addBinding", json!({ "name": DISPATCH_BINDING })).await?;
    cdp.command(
        session,
        "Page.addScriptToEvaluateOnNewDocument",
        json!({ "source": inner.init_script }),
    )
    .await?;
    if waiting {
        cdp.command(session, "Runtime.runIfWaitingForDebugger", json!({})).await?;
    }
    debug!(target: "bridge::runtime", session_id, "page session instrumented");
    Ok(())
}

/// Waits for the event pump to finish instrumenting a target.
async fn wait_for_session(
    inner: &Arc<RuntimeInner>,
    target_id: &str,
) -> Result<String, BridgeError> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(session_id) = inner.sessions.lock().get(target_id).cloned() {
            return Ok(session_id);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BridgeError::BrowserDisconnected);
        }
        let _ = tokio::time::timeout(Duration::from_millis(250), inner.attach_notify.notified())
            .await;
    }
}

/// Routes DevTools events: target attachment, host calls and the popup
/// observer, until the socket closes.
async fn event_pump(
    inner: Arc<RuntimeInner>,
    mut events: broadcast::Receiver<crate::cdp::CdpEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target: "bridge::runtime", skipped, "event pump lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event.method.as_str() {
            "Target.attachedToTarget" => {
                let info = &event.params["targetInfo"];
                if info["type"] != "page" {
                    continue;
                }
                let Some(session_id) = event.params["sessionId"].as_str() else { continue };
                let target_id = info["targetId"].as_str().unwrap_or_default().to_string();
                let waiting = event.params["waitingForDebugger"].as_bool().unwrap_or(false);
                let session_id = session_id.to_string();
                let inner = inner.clone();
                tokio::spawn(async move {
                    if let Err(err) = setup_session(&inner, &session_id, waiting).await {
                        warn!(target: "bridge::runtime", %err, "failed to instrument target");
                        return;
                    }
                    inner.sessions.lock().insert(target_id, session_id);
                    inner.attach_notify.notify_waiters();
                });
            }
            "Runtime.bindingCalled" => {
                if event.params["name"] != DISPATCH_BINDING {
                    continue;
                }
                let Some(session_id) = event.session_id.clone() else { continue };
                let payload = event.params["payload"].as_str().unwrap_or_default().to_string();
                // Every host call is its own task; a suspended signing
                // request must not block unrelated dispatches.
                tokio::spawn(handle_host_call(inner.clone(), session_id, payload));
            }
            "Target.targetCreated" | "Target.targetInfoChanged" => {
                let info = &event.params["targetInfo"];
                let target_id = info["targetId"].as_str().unwrap_or_default();
                if inner.main_target.lock().as_deref() == Some(target_id) {
                    continue;
                }
                inner.capture.observe_target(
                    target_id,
                    info["type"].as_str().unwrap_or_default(),
                    info["url"].as_str().unwrap_or_default(),
                );
            }
            DISCONNECTED_EVENT => {
                if !inner.closed.swap(true, Ordering::SeqCst) {
                    info!(target: "bridge::runtime", "browser disconnected");
                    let _ = inner.events.send(SessionEvent::BrowserClosed);
                }
                break;
            }
            _ => {}
        }
    }
}

/// Executes one `__rpcProxy` / `__submitCapture` invocation and delivers the
/// outcome back into the calling page.
async fn handle_host_call(inner: Arc<RuntimeInner>, session_id: String, payload: String) {
    let call: BindingPayload = match serde_json::from_str(&payload) {
        Ok(call) => call,
        Err(err) => {
            warn!(target: "bridge::runtime", %err, "malformed host call payload");
            return;
        }
    };
    let id = call.id;

    let outcome: Result<Value, String> = match call.kind.as_str() {
        "rpc" => {
            let method = call.payload["method"].as_str().unwrap_or_default().to_string();
            let params = call.payload.get("params").cloned().unwrap_or(Value::Null);
            inner.dispatcher.dispatch(&method, params).await.map_err(|e| e.to_string())
        }
        "capture" => {
            let url = call.payload["url"].as_str().unwrap_or_default().to_string();
            let body = call.payload["body"].as_str().unwrap_or_default().to_string();
            inner.capture.submit(&url, &body).await.map(Value::String).map_err(|e| e.to_string())
        }
        other => Err(format!("unknown host call kind {other:?}")),
    };

    let expression = deliver_expression(id, &outcome);
    if let Err(err) = inner
        .cdp
        .command(
            Some(&session_id),
            "Runtime.evaluate",
            json!({ "expression": expression, "returnByValue": false }),
        )
        .await
    {
        debug!(target: "bridge::runtime", %err, id, "could not deliver host call result");
    }
}

/// Builds the in-page delivery call. The serialized JSON doubles as a JS
/// literal, so the outcome can be spliced into the expression directly.
fn deliver_expression(id: u64, outcome: &Result<Value, String>) -> String {
    match outcome {
        Ok(value) => format!(
            "window.__dappcapDeliver({id}, true, {});",
            serde_json::to_string(value).unwrap_or_else(|_| "null".into())
        ),
        Err(message) => {
            format!("window.__dappcapDeliver({id}, false, {});", crate::capture::js_string(message))
        }
    }
}
