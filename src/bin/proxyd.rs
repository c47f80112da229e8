//! Thin launcher binary: parses flags, loads `proxyd.toml`, and runs the
//! proxy core until interrupted.
//!
//! Grounded on the teacher's `main.rs`/`cli.rs` split (a `fn main` that does
//! nothing but call into the library and report the error, `clap::Parser`
//! derive for the flag surface) — generalized from a subcommand-driven CLI
//! into a single always-serve daemon, since that's this crate's one job.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "proxyd")]
#[command(about = "HTTP/HTTPS reverse proxy and redirector")]
struct Args {
    /// Path to the TOML launcher configuration.
    #[arg(long, default_value = "proxyd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    proxycore::logging::init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "proxyd exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let settings = proxycore::launcher::load(&args.config)?;

    let server = proxycore::server::Server::new(settings, std::sync::Arc::new(proxycore::hooks::NoopHooks));
    server.start().await?;

    tracing::info!("proxyd running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.reset().await;

    Ok(())
}
