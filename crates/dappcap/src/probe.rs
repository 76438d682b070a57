//! Environment probe: verifies a drivable browser exists and the capture
//! upstream is reachable before a session starts.

use eyre::{Context, Result, bail};
use std::{
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;

/// Truthy values enable dumping raw probe subprocess output.
pub const DEBUG_ENV: &str = "DAPPCAP_DEBUG";

/// Browser binaries tried in order when no override is given.
const BROWSER_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

const UPSTREAM_PROBE_URL: &str = "https://mcp.figma.com/";

/// What the probe found.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub browser: PathBuf,
    pub browser_version: String,
    pub upstream_reachable: bool,
}

/// Runs all checks. Fails hard only when no browser can be found; an
/// unreachable upstream is reported but left to the user to judge.
pub async fn run(browser_override: Option<&Path>, logs_dir: &Path) -> Result<ProbeReport> {
    let (browser, browser_version) = find_browser(browser_override, logs_dir).await?;
    info!(target: "probe", browser = %browser.display(), version = %browser_version, "browser found");

    let upstream_reachable = upstream_reachable().await;
    if !upstream_reachable {
        warn!(target: "probe", url = UPSTREAM_PROBE_URL, "capture upstream not reachable");
    }

    Ok(ProbeReport { browser, browser_version, upstream_reachable })
}

/// Locates a browser binary and confirms it runs by asking for its version.
async fn find_browser(
    browser_override: Option<&Path>,
    logs_dir: &Path,
) -> Result<(PathBuf, String)> {
    let candidates: Vec<PathBuf> = match browser_override {
        Some(path) => vec![path.to_path_buf()],
        None => BROWSER_CANDIDATES.iter().map(PathBuf::from).collect(),
    };

    for candidate in &candidates {
        let output = match Command::new(candidate).arg("--version").output().await {
            Ok(output) => output,
            Err(_) => continue,
        };
        dump_probe_output(logs_dir, candidate, &output.stdout, &output.stderr);
        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok((candidate.clone(), version));
        }
    }

    bail!(
        "no drivable browser found (tried {}); install Chrome/Chromium or set DAPPCAP_CHROME",
        candidates.iter().map(|c| c.display().to_string()).collect::<Vec<_>>().join(", ")
    )
}

async fn upstream_reachable() -> bool {
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(client) => client,
        Err(_) => return false,
    };
    client.get(UPSTREAM_PROBE_URL).send().await.is_ok()
}

/// With `DAPPCAP_DEBUG` set, raw subprocess output lands in
/// `<logs>/pty-dump.log` plus a hex-formatted variant for byte-level
/// inspection of terminal escape sequences.
fn dump_probe_output(logs_dir: &Path, candidate: &Path, stdout: &[u8], stderr: &[u8]) {
    if !debug_enabled() {
        return;
    }
    if let Err(err) = write_dumps(logs_dir, candidate, stdout, stderr) {
        warn!(target: "probe", %err, "failed to write probe dump");
    }
}

fn write_dumps(logs_dir: &Path, candidate: &Path, stdout: &[u8], stderr: &[u8]) -> Result<()> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("creating {}", logs_dir.display()))?;

    let mut raw = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join("pty-dump.log"))?;
    writeln!(raw, "=== {} ===", candidate.display())?;
    raw.write_all(stdout)?;
    raw.write_all(stderr)?;

    let mut hex = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join("pty-dump.hex.log"))?;
    writeln!(hex, "=== {} ===", candidate.display())?;
    for chunk in [stdout, stderr] {
        hex.write_all(hex_dump(chunk).as_bytes())?;
    }
    Ok(())
}

fn debug_enabled() -> bool {
    matches!(
        std::env::var(DEBUG_ENV).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Classic offset + hex rows, sixteen bytes per line.
fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}  ", row * 16));
        for byte in chunk {
            out.push_str(&format!("{byte:02x} "));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_rows_and_offsets() {
        let dump = hex_dump(&[0u8, 1, 2, 0xff]);
        assert_eq!(dump, "00000000  00 01 02 ff \n");

        let dump = hex_dump(&[0xaa; 17]);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000  aa"));
        assert!(lines[1].starts_with("00000010  aa"));
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn probe_dump_files_land_in_logs_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_dumps(dir.path(), Path::new("chromium"), b"Chromium 126.0\n", b"").unwrap();

        let raw = std::fs::read_to_string(dir.path().join("pty-dump.log")).unwrap();
        assert!(raw.contains("=== chromium ==="));
        assert!(raw.contains("Chromium 126.0"));

        let hex = std::fs::read_to_string(dir.path().join("pty-dump.hex.log")).unwrap();
        assert!(hex.contains("00000000"));
    }
}
