//! Daemon wiring: store, node RPC, engine, scheduler and operator socket.

use std::sync::Arc;

use lnprobe_core::{PROBE_AMOUNT_SAT, Store};
use lnprobe_engine::ProbeEngine;
use lnprobe_rpc::{LightningRpc, UnixRpc};
use tokio_util::sync::CancellationToken;

use crate::cli::DaemonOpts;
use crate::server;
use crate::store::SqliteStore;

pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    tracing::info!("lnprobe daemon starting, probing with {PROBE_AMOUNT_SAT} sat");

    let db_path = opts.db_path();
    let store = tokio::task::spawn_blocking({
        let db_path = db_path.clone();
        move || SqliteStore::open(&db_path)
    })
    .await?
    .map_err(|e| anyhow::anyhow!("cannot open probe database {}: {e}", db_path.display()))?;
    let store: Arc<dyn Store> = Arc::new(store);
    let rpc: Arc<dyn LightningRpc> = Arc::new(UnixRpc::new(opts.rpc_file()));
    let engine = Arc::new(ProbeEngine::new(store, rpc, opts.engine_config()));

    engine.seed_targets().await?;
    engine.recover_pending().await?;

    let listener = server::bind(socket_path).await?;
    let server_engine = Arc::clone(&engine);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(listener, server_engine).await {
            tracing::error!("operator socket error: {e}");
        }
    });

    let cancel = CancellationToken::new();
    let scheduler = engine.scheduler();
    let scheduler_engine = Arc::clone(&engine);
    let scheduler_cancel = cancel.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler
            .run(scheduler_engine.as_ref(), scheduler_cancel)
            .await;
    });

    tokio::select! {
        res = shutdown_signal() => res?,
        _ = scheduler_handle => {
            tracing::warn!("scheduler exited unexpectedly");
        }
        _ = server_handle => {
            tracing::warn!("operator socket exited unexpectedly");
        }
    }

    cancel.cancel();
    let _ = std::fs::remove_file(socket_path);
    let stats = engine.stats();
    tracing::info!(
        pending = stats.pending_probes,
        exclusions = stats.exclusions,
        temporary_exclusions = stats.temporary_exclusions,
        "daemon stopped"
    );
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}
