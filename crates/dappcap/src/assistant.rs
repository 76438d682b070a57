//! Capture-id assistant.
//!
//! Runs a user-configured helper command and scans its output for a capture
//! identifier. The workflow falls back to a manual prompt when no assistant
//! is configured or nothing usable comes back.

use eyre::{Context, Result};
use regex::Regex;
use std::{sync::LazyLock, time::Duration};
use tokio::process::Command;

/// Command line (program plus arguments) of the assistant subprocess.
pub const ASSISTANT_ENV: &str = "DAPPCAP_ASSISTANT";

const ASSISTANT_TIMEOUT: Duration = Duration::from_secs(60);

/// Matches `captureId: u-2`, `"captureId": "u-2"`, `capture id = u-2` and
/// friends; the first group is the identifier.
static CAPTURE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)capture[ _-]?id["']?\s*[:=]\s*["']?([A-Za-z0-9][A-Za-z0-9_-]*)"#).unwrap()
});

/// Runs the configured assistant, if any, and extracts a capture id from its
/// output.
pub async fn capture_id() -> Result<Option<String>> {
    let Ok(command_line) = std::env::var(ASSISTANT_ENV) else {
        return Ok(None);
    };
    let mut parts = command_line.split_whitespace();
    let Some(program) = parts.next() else {
        return Ok(None);
    };

    info!(target: "assistant", program, "asking assistant for a capture id");
    let output = tokio::time::timeout(
        ASSISTANT_TIMEOUT,
        Command::new(program).args(parts).output(),
    )
    .await
    .context("assistant timed out")?
    .with_context(|| format!("running assistant {program:?}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(extract_capture_id(&stdout).or_else(|| extract_capture_id(&stderr)))
}

fn extract_capture_id(text: &str) -> Option<String> {
    CAPTURE_ID_RE.captures(text).map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_common_shapes() {
        assert_eq!(extract_capture_id("captureId: u-2").as_deref(), Some("u-2"));
        assert_eq!(extract_capture_id(r#"{"captureId":"abc_123"}"#).as_deref(), Some("abc_123"));
        assert_eq!(extract_capture_id("Capture ID = XYZ-9").as_deref(), Some("XYZ-9"));
        assert_eq!(
            extract_capture_id("noise\ncapture_id: u-7\nmore").as_deref(),
            Some("u-7")
        );
    }

    #[test]
    fn ignores_unrelated_output() {
        assert_eq!(extract_capture_id("no identifiers here"), None);
        assert_eq!(extract_capture_id(""), None);
        assert_eq!(extract_capture_id("capture failed"), None);
    }
}
