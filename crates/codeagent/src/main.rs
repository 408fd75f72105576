//! codeagent entry point.
//!
//! Stdout carries the final task message only; progress, mirrored backend
//! output, and diagnostics go to stderr.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use codeagent::cli::{execute, resolve, Cli};
use codeagent::error::exit;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let effective = match resolve(&cli) {
        Ok(effective) => effective,
        Err(err) => {
            eprintln!("codeagent: {err}");
            std::process::exit(exit::CONFIG);
        }
    };

    if effective.config.debug {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("codeagent=debug,agent_events=debug"));
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    }

    let code = execute(effective).await;
    std::process::exit(code);
}
