//! Terminal approver: renders a signing request's display fields and
//! settles it from the user's answer.

use dappcap_bridge::TxRequest;
use dappcap_config::SessionLog;

/// Prints one pending request and the approval prompt.
pub(crate) fn show_request(request: &TxRequest) {
    println!("\n--- Signing request #{} ({}) ---", request.sequence_id, request.method);
    for (key, value) in &request.display {
        if value.contains('\n') {
            println!("  {key}:");
            for line in value.lines() {
                println!("    {line}");
            }
        } else {
            println!("  {key}: {value}");
        }
    }
    println!("Approve? [y/N]");
}

/// Settles a request from the user's answer: approval signs and resolves
/// with the produced value, anything else rejects.
pub(crate) async fn settle(request: TxRequest, answer: &str, log: &SessionLog) {
    if matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes") {
        match request.sign().await {
            Ok(value) => {
                log.line(format!("request #{} approved -> {value}", request.sequence_id));
                request.resolve(value);
            }
            Err(err) => {
                log.line(format!("request #{} failed: {err}", request.sequence_id));
                eprintln!("Signing failed: {err}");
                request.reject(err.to_string());
            }
        }
    } else {
        log.line(format!("request #{} rejected by user", request.sequence_id));
        request.reject("User rejected the request");
    }
}
