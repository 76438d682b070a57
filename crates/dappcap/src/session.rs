//! Live session loop.
//!
//! Runs the browser runtime, relays session events into the log and takes
//! user commands until the browser closes or the user quits. One task owns
//! the terminal: the approver prompts and the command input share the same
//! line stream, so a pending approval simply claims the next line.

use crate::approver_ui;
use dappcap_bridge::{
    ApproverBus, BrowserRuntime, CaptureBridge, CaptureEndpoints, RpcDispatcher, RuntimeConfig,
    SessionEvent, TxRequest, events, provider,
};
use dappcap_config::{Chain, SessionLog};
use dappcap_wallets::Wallet;
use eyre::{Context, Result};
use std::{collections::VecDeque, path::PathBuf, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

/// Everything a session needs; immutable once the session starts.
pub struct SessionConfig {
    pub wallet: Wallet,
    pub chain: Chain,
    pub url: String,
    pub capture_id: String,
    pub browser: PathBuf,
    pub logs_dir: PathBuf,
}

pub async fn run(config: SessionConfig) -> Result<()> {
    let log = SessionLog::create(&config.logs_dir).context("opening session log")?;
    log.line(format!(
        "wallet {} on {} -> {}",
        config.wallet.address_string(),
        config.chain,
        config.url
    ));

    let approver = ApproverBus::new();
    let mut requests = approver.attach();

    let signer = config.wallet.signer().context("loading session key")?;
    let dispatcher = Arc::new(RpcDispatcher::new(signer, config.chain.clone(), approver.clone()));
    let (events_tx, mut session_events) = events::channel();
    let capture = Arc::new(CaptureBridge::new(
        CaptureEndpoints::new(&config.capture_id),
        events_tx.clone(),
    ));
    let init_script =
        provider::build_init_script(&config.wallet.address_string(), &config.chain);

    let runtime = BrowserRuntime::launch(
        RuntimeConfig {
            browser_binary: config.browser.clone(),
            start_url: config.url.clone(),
            init_script,
        },
        dispatcher,
        capture,
        events_tx,
    )
    .await
    .context("launching browser")?;
    log.line("browser launched");

    println!("Session running. Commands: [t]oolbar inject, [c]laim URL, [q]uit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: VecDeque<TxRequest> = VecDeque::new();
    let mut awaiting_answer = false;
    let mut last_claim_url: Option<String> = None;

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { continue };
                log.line(format!(
                    "signing request #{} ({})",
                    request.sequence_id, request.method
                ));
                pending.push_back(request);
                if !awaiting_answer {
                    approver_ui::show_request(pending.front().expect("just pushed"));
                    awaiting_answer = true;
                }
            }

            event = session_events.recv() => {
                match event {
                    Ok(SessionEvent::BrowserClosed) => {
                        log.line("browser closed");
                        println!("Browser closed, ending session.");
                        break;
                    }
                    Ok(event) => on_event(&event, &log, &mut last_claim_url),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }

            line = lines.next_line() => {
                let Some(line) = line.context("reading terminal input")? else {
                    break; // stdin closed
                };
                let input = line.trim().to_string();

                if awaiting_answer {
                    let request = pending.pop_front().expect("awaiting implies a request");
                    approver_ui::settle(request, &input, &log).await;
                    awaiting_answer = false;
                    if let Some(next) = pending.front() {
                        approver_ui::show_request(next);
                        awaiting_answer = true;
                    }
                    continue;
                }

                match input.as_str() {
                    "t" | "toolbar" => {
                        println!("Injecting capture toolbar…");
                        let outcome = runtime.inject_toolbar().await;
                        if outcome.success {
                            log.line("capture toolbar injected");
                            println!("Toolbar ready.");
                        } else {
                            let error = outcome.error.unwrap_or_default();
                            log.line(format!("toolbar injection failed: {error}"));
                            eprintln!("Toolbar injection failed: {error}");
                        }
                    }
                    "c" | "claim" => match &last_claim_url {
                        Some(url) => println!("Claim URL: {url}"),
                        None => println!("No claim URL yet."),
                    },
                    "q" | "quit" => break,
                    "" => {}
                    other => {
                        println!(
                            "Unknown command {other:?}. Commands: [t]oolbar, [c]laim, [q]uit."
                        );
                    }
                }
            }
        }
    }

    // Teardown: nothing stays suspended once the session ends.
    for request in pending.drain(..) {
        request.reject("Session closed");
    }
    while let Ok(request) = requests.try_recv() {
        request.reject("Session closed");
    }
    approver.detach();
    runtime.close().await;
    log.finish();
    println!("Session log: {}", log.path().display());
    Ok(())
}

fn on_event(event: &SessionEvent, log: &SessionLog, last_claim_url: &mut Option<String>) {
    log.line(event_log_line(event));
    match event {
        SessionEvent::CaptureClaimUrl(url) => {
            *last_claim_url = Some(url.clone());
            println!("Claim URL: {url}");
        }
        SessionEvent::CaptureNextId(id) => println!("Next capture id: {id}"),
        SessionEvent::CaptureFigmaUrl(url) => println!("Capture opened: {url}"),
        SessionEvent::CaptureSubmitted(_) | SessionEvent::BrowserClosed => {}
    }
}

fn event_log_line(event: &SessionEvent) -> String {
    match event {
        SessionEvent::CaptureSubmitted(body) => {
            // Response bodies can be large; the log records a preview.
            let preview: String = body.chars().take(200).collect();
            format!("{} {preview}", event.name())
        }
        SessionEvent::CaptureClaimUrl(url) | SessionEvent::CaptureFigmaUrl(url) => {
            format!("{} {url}", event.name())
        }
        SessionEvent::CaptureNextId(id) => format!("{} {id}", event.name()),
        SessionEvent::BrowserClosed => event.name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_lines_carry_payloads() {
        assert_eq!(
            event_log_line(&SessionEvent::CaptureClaimUrl("https://figma.com/file/X".into())),
            "capture:claimUrl https://figma.com/file/X"
        );
        assert_eq!(
            event_log_line(&SessionEvent::CaptureNextId("u-2".into())),
            "capture:nextId u-2"
        );
        assert_eq!(event_log_line(&SessionEvent::BrowserClosed), "browser:closed");

        let long_body = "x".repeat(500);
        let line = event_log_line(&SessionEvent::CaptureSubmitted(long_body));
        assert!(line.starts_with("capture:submitted "));
        assert!(line.len() <= "capture:submitted ".len() + 200);
    }
}
