//! CLI definition using clap derive.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lnprobe_core::PROBE_AMOUNT_SAT;
use lnprobe_engine::EngineConfig;

#[derive(Parser)]
#[command(name = "lnprobe", about = "Lightning canary-payment probe daemon")]
pub struct Cli {
    /// Operator socket path (default: $XDG_RUNTIME_DIR/lnprobe/lnprobe.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (scheduler + operator socket)
    Daemon(DaemonOpts),
    /// Show pending probe and exclusion counts
    Stats,
    /// Issue a probe now and print it once classified
    Probe,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Lightning node data directory
    #[arg(long, env = "LIGHTNING_DIR")]
    pub lightning_dir: Option<PathBuf>,

    /// Node RPC socket (default: <lightning-dir>/lightning-rpc)
    #[arg(long)]
    pub rpc_file: Option<PathBuf>,

    /// Probe database (default: <lightning-dir>/probes-1000.db)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Seconds between probes
    #[arg(long, default_value = "3600")]
    pub probe_interval: u64,

    /// Seconds a channel stays temporarily excluded
    #[arg(long, default_value = "1800")]
    pub probe_exclusion_duration: u64,

    /// Seconds before a pending probe is given up on (0 disables)
    #[arg(long, default_value = "86400")]
    pub pending_timeout: u64,

    /// Concurrent dispatches allowed
    #[arg(long, default_value = "4")]
    pub max_inflight: usize,

    /// Seconds to wait before the first scheduler iteration
    #[arg(long, default_value = "30")]
    pub warmup: u64,
}

impl DaemonOpts {
    pub fn lightning_dir(&self) -> PathBuf {
        if let Some(dir) = &self.lightning_dir {
            return dir.clone();
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".lightning")
    }

    pub fn rpc_file(&self) -> PathBuf {
        self.rpc_file
            .clone()
            .unwrap_or_else(|| self.lightning_dir().join("lightning-rpc"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db.clone().unwrap_or_else(|| {
            self.lightning_dir()
                .join(format!("probes-{PROBE_AMOUNT_SAT}.db"))
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            warmup: Duration::from_secs(self.warmup),
            probe_interval: Duration::from_secs(self.probe_interval),
            exclusion_duration: Duration::from_secs(self.probe_exclusion_duration),
            pending_timeout: (self.pending_timeout > 0)
                .then(|| Duration::from_secs(self.pending_timeout)),
            max_inflight_dispatches: self.max_inflight,
            ..EngineConfig::default()
        }
    }
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/lnprobe/lnprobe.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/lnprobe-{user}/lnprobe.sock")
}
