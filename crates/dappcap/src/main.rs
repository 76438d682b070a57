//! dappcap: drive a live web application with a synthetic wallet while the
//! host mediates every wallet call and proxies design captures.

#[macro_use]
extern crate tracing;

mod approver_ui;
mod assistant;
mod opts;
mod probe;
mod session;
mod workflow;

use clap::Parser;
use opts::Dappcap;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let opts = Dappcap::parse();
    init_tracing(opts.verbosity);
    workflow::run(opts).await
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity > 1)
        .with_writer(std::io::stderr)
        .init();
}
