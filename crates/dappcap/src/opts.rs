use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// CLI arguments.
#[derive(Debug, Parser)]
#[command(name = "dappcap", version, about)]
pub struct Dappcap {
    /// Target application URL. Prompted for when omitted.
    #[arg(long)]
    pub url: Option<String>,

    /// Numeric chain id to impersonate. Prompted for when omitted.
    #[arg(long)]
    pub chain_id: Option<u64>,

    /// Capture identifier. When omitted the assistant subprocess is asked,
    /// falling back to a prompt.
    #[arg(long)]
    pub capture_id: Option<String>,

    /// Browser binary to launch instead of auto-discovering one.
    #[arg(long, env = "DAPPCAP_CHROME", value_name = "PATH")]
    pub browser: Option<PathBuf>,

    /// Config directory override.
    #[arg(long, env = "DAPPCAP_HOME", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Re-run the environment checks even if setup already completed.
    #[arg(long)]
    pub resetup: bool,

    /// Verbosity; repeat for more detail.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbosity: u8,
}
