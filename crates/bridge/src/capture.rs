//! Capture-toolbar plumbing.
//!
//! Stage A runs at browser launch: `__submitCapture` proxies the toolbar's
//! upstream submissions through the host and a target observer watches the
//! browser context for popups resolving to the capture platform. Stage B
//! runs on user command: fetch the third-party toolbar script host-side
//! (its origin serves a CSP that forbids loading it from the page), inject
//! it, install the fetch interposer and kick off the capture.

use crate::{
    assets,
    error::BridgeError,
    events::SessionEvent,
    runtime::PageHandle,
};
use regex::Regex;
use serde_json::Value;
use std::{collections::HashSet, sync::LazyLock, time::Duration};
use tokio::sync::broadcast;

/// How long the freshly injected toolbar script gets to initialise before
/// its API is called. Empirical.
pub const TOOLBAR_SETTLE: Duration = Duration::from_secs(1);

/// First capture-platform URL in an opaque response body.
static FIGMA_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://(www\.)?figma\.com/[^\s"'\\]+"#).unwrap());

/// Where the capture script lives and where submissions go.
#[derive(Debug, Clone)]
pub struct CaptureEndpoints {
    /// Identifier for this capture session, handed to the toolbar.
    pub capture_id: String,
    /// Well-known URL the toolbar script is fetched from.
    pub script_url: String,
    /// Upstream submit endpoint, derived from the capture id.
    pub submit_endpoint: String,
}

impl CaptureEndpoints {
    /// Endpoints under the default upstream base.
    pub fn new(capture_id: impl Into<String>) -> Self {
        let capture_id = capture_id.into();
        Self {
            script_url: "https://mcp.figma.com/toolbar/capture.js".into(),
            submit_endpoint: format!("https://mcp.figma.com/capture/{capture_id}/submit"),
            capture_id,
        }
    }
}

/// Outcome of a toolbar injection, reported to the workflow only; the page
/// is never disturbed by a failed injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl InjectOutcome {
    fn ok() -> Self {
        Self { success: true, error: None }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// Host side of the capture toolbar.
pub struct CaptureBridge {
    endpoints: CaptureEndpoints,
    http: reqwest::Client,
    events: broadcast::Sender<SessionEvent>,
    /// Targets already reported via `capture:figmaUrl`.
    seen_targets: parking_lot::Mutex<HashSet<String>>,
}

impl CaptureBridge {
    pub fn new(endpoints: CaptureEndpoints, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            endpoints,
            http: reqwest::Client::new(),
            events,
            seen_targets: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    pub fn endpoints(&self) -> &CaptureEndpoints {
        &self.endpoints
    }

    /// Backs the in-page `__submitCapture` call: POSTs the body to the
    /// upstream endpoint and returns the raw response text, emitting
    /// `capture:submitted` exactly once and the derived events best-effort.
    pub async fn submit(&self, url: &str, body: &str) -> Result<String, BridgeError> {
        debug!(target: "bridge::capture", url, "proxying capture submission");
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| BridgeError::CaptureSubmitFailed(e.to_string()))?;
        let text =
            response.text().await.map_err(|e| BridgeError::CaptureSubmitFailed(e.to_string()))?;

        self.emit(SessionEvent::CaptureSubmitted(text.clone()));
        self.parse_submission(&text);
        Ok(text)
    }

    /// Best-effort parse of an upstream response: structured fields first,
    /// then a plain scan for a capture-platform URL.
    fn parse_submission(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(parsed) => {
                if let Some(claim_url) = parsed.get("claimUrl").and_then(Value::as_str) {
                    self.emit(SessionEvent::CaptureClaimUrl(claim_url.to_string()));
                }
                if let Some(next_id) = parsed.get("nextCaptureId").and_then(Value::as_str) {
                    self.emit(SessionEvent::CaptureNextId(next_id.to_string()));
                }
            }
            Err(_) => {
                if let Some(found) = FIGMA_URL_RE.find(text) {
                    self.emit(SessionEvent::CaptureClaimUrl(found.as_str().to_string()));
                }
            }
        }
    }

    /// Popup observer: called for every target the browser context creates
    /// or navigates. Emits `capture:figmaUrl` once per target that resolves
    /// to a capture-platform URL.
    pub fn observe_target(&self, target_id: &str, kind: &str, url: &str) {
        if kind != "page" || url.is_empty() || url == "about:blank" {
            return;
        }
        if !url.contains("figma.com") {
            return;
        }
        if !self.seen_targets.lock().insert(target_id.to_string()) {
            return;
        }
        debug!(target: "bridge::capture", target_id, url, "capture result popup observed");
        self.emit(SessionEvent::CaptureFigmaUrl(url.to_string()));
    }

    /// Stage B: fetch the toolbar script, inject it into the current page,
    /// install the fetch interposer and start the capture.
    pub async fn inject_toolbar(&self, page: &PageHandle) -> InjectOutcome {
        let script = match self.fetch_script().await {
            Ok(script) => script,
            Err(err) => {
                warn!(target: "bridge::capture", %err, "toolbar injection aborted");
                return InjectOutcome::failed(err.to_string());
            }
        };

        if let Err(err) = page.evaluate(&script).await {
            return InjectOutcome::failed(format!("toolbar script evaluation failed: {err}"));
        }
        tokio::time::sleep(TOOLBAR_SETTLE).await;

        if let Err(err) = page.evaluate(assets::js::INTERCEPTOR_JS).await {
            return InjectOutcome::failed(format!("fetch interposer install failed: {err}"));
        }

        // Fire-and-forget; the toolbar UI reports its own errors in-page.
        let kickoff = self.capture_kickoff_script();
        if let Err(err) = page.evaluate(&kickoff).await {
            warn!(target: "bridge::capture", %err, "capture kickoff evaluation failed");
        }

        info!(target: "bridge::capture", capture_id = %self.endpoints.capture_id, "toolbar injected");
        InjectOutcome::ok()
    }

    async fn fetch_script(&self) -> Result<String, BridgeError> {
        let response = self
            .http
            .get(&self.endpoints.script_url)
            .send()
            .await
            .map_err(|e| BridgeError::ScriptFetchFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BridgeError::ScriptFetchFailed(format!(
                "{} returned {}",
                self.endpoints.script_url,
                response.status()
            )));
        }
        response.text().await.map_err(|e| BridgeError::ScriptFetchFailed(e.to_string()))
    }

    /// In-page call starting the capture; exceptions and promise rejections
    /// are both swallowed.
    fn capture_kickoff_script(&self) -> String {
        format!(
            r#"(function () {{
  try {{
    var api = window.figmaCapture;
    if (api && typeof api.captureForDesign === 'function') {{
      var result = api.captureForDesign({{
        captureId: {capture_id},
        endpoint: {endpoint},
        selector: 'body'
      }});
      if (result && typeof result.catch === 'function') {{
        result.catch(function () {{}});
      }}
    }}
  }} catch (err) {{}}
}})();"#,
            capture_id = js_string(&self.endpoints.capture_id),
            endpoint = js_string(&self.endpoints.submit_endpoint),
        )
    }

    fn emit(&self, event: SessionEvent) {
        trace!(target: "bridge::capture", event = event.name(), "session event");
        let _ = self.events.send(event);
    }
}

/// Escapes a Rust string into a JS string literal.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::to_string(value).expect("strings always serialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use axum::{Router, routing::post};

    async fn serve_submit(body: &'static str) -> String {
        let app = Router::new().route("/capture/u-1/submit", post(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/capture/u-1/submit")
    }

    fn bridge() -> (CaptureBridge, broadcast::Receiver<SessionEvent>) {
        let (tx, rx) = events::channel();
        (CaptureBridge::new(CaptureEndpoints::new("u-1"), tx), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn endpoints_derive_from_capture_id() {
        let endpoints = CaptureEndpoints::new("u-42");
        assert_eq!(endpoints.submit_endpoint, "https://mcp.figma.com/capture/u-42/submit");
        assert!(endpoints.script_url.contains("mcp.figma.com"));
    }

    #[tokio::test]
    async fn submit_parses_structured_response() {
        let upstream =
            serve_submit(r#"{"claimUrl":"https://figma.com/file/XYZ","nextCaptureId":"u-2"}"#).await;
        let (bridge, mut rx) = bridge();

        let text = bridge.submit(&upstream, r#"{"nodes":[]}"#).await.unwrap();
        assert!(text.contains("figma.com/file/XYZ"));

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                SessionEvent::CaptureSubmitted(text.clone()),
                SessionEvent::CaptureClaimUrl("https://figma.com/file/XYZ".into()),
                SessionEvent::CaptureNextId("u-2".into()),
            ]
        );
    }

    #[tokio::test]
    async fn submit_falls_back_to_url_scan() {
        let upstream =
            serve_submit("capture stored, view at https://www.figma.com/file/ABC123/view now")
                .await;
        let (bridge, mut rx) = bridge();

        bridge.submit(&upstream, "payload").await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SessionEvent::CaptureSubmitted(_)));
        assert_eq!(
            events[1],
            SessionEvent::CaptureClaimUrl("https://www.figma.com/file/ABC123/view".into())
        );
    }

    #[tokio::test]
    async fn submit_without_urls_emits_only_submitted() {
        let upstream = serve_submit("ok").await;
        let (bridge, mut rx) = bridge();

        bridge.submit(&upstream, "payload").await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events, vec![SessionEvent::CaptureSubmitted("ok".into())]);
    }

    #[tokio::test]
    async fn submit_network_failure_is_reported() {
        let (bridge, mut rx) = bridge();
        let err = bridge.submit("http://127.0.0.1:1/submit", "payload").await.unwrap_err();
        assert!(matches!(err, BridgeError::CaptureSubmitFailed(_)));
        assert!(drain(&mut rx).is_empty(), "no events on a failed submission");
    }

    #[test]
    fn popup_observer_filters_and_dedupes() {
        let (bridge, mut rx) = bridge();

        bridge.observe_target("t1", "page", "about:blank");
        bridge.observe_target("t1", "page", "https://example.org/");
        bridge.observe_target("t2", "iframe", "https://figma.com/file/XYZ");
        assert!(drain(&mut rx).is_empty());

        bridge.observe_target("t3", "page", "https://www.figma.com/file/XYZ");
        bridge.observe_target("t3", "page", "https://www.figma.com/file/XYZ?page=2");
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![SessionEvent::CaptureFigmaUrl("https://www.figma.com/file/XYZ".into())]
        );
    }

    #[test]
    fn kickoff_script_carries_capture_parameters() {
        let (bridge, _rx) = bridge();
        let script = bridge.capture_kickoff_script();
        assert!(script.contains(r#"captureId: "u-1""#));
        assert!(script.contains(r#"endpoint: "https://mcp.figma.com/capture/u-1/submit""#));
        assert!(script.contains("selector: 'body'"));
        assert!(script.contains("captureForDesign"));
    }

    #[test]
    fn js_string_escapes() {
        assert_eq!(js_string("plain"), r#""plain""#);
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
    }
}
