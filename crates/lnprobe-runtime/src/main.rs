//! lnprobe: canary-payment probe daemon for a Lightning node.
//! Repeatedly routes payments with random hashes to every known node and
//! records where and why they fail.

use clap::Parser;

mod cli;
mod client;
mod daemon;
mod operator;
mod server;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("LNPROBE_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Stats => client::cmd_stats(&socket_path).await?,
        cli::Command::Probe => client::cmd_probe(&socket_path).await?,
    }

    Ok(())
}
