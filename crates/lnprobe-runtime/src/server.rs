//! Operator socket. The daemon owns one unix socket in a private
//! directory and answers `probe-stats` and `probe` on it.

use std::path::Path;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};

use lnprobe_engine::ProbeEngine;

use crate::operator::{self, METHOD_NOT_FOUND, Method, PROBE_FAILED, Request, Response};

/// Socket directory, created private to the daemon's user.
fn prepare_socket_dir(socket_path: &Path) -> anyhow::Result<()> {
    let dir = socket_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("socket path {} has no parent", socket_path.display()))?;
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// A socket file nobody answers on is left over from a daemon that died;
/// one that answers belongs to a live daemon.
async fn clear_stale_socket(socket_path: &Path) -> anyhow::Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }
    if UnixStream::connect(socket_path).await.is_ok() {
        anyhow::bail!("an lnprobe daemon is already listening on {}", socket_path.display());
    }
    std::fs::remove_file(socket_path)?;
    tracing::info!(socket = %socket_path.display(), "removed stale operator socket");
    Ok(())
}

/// Bind the operator socket, owner-only.
pub async fn bind(socket_path: &str) -> anyhow::Result<UnixListener> {
    let path = Path::new(socket_path);
    prepare_socket_dir(path)?;
    clear_stale_socket(path).await?;

    let listener = UnixListener::bind(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    tracing::info!(socket = %socket_path, "operator socket listening");
    Ok(listener)
}

/// Serve operator requests until the listener fails.
pub async fn run_server(listener: UnixListener, engine: Arc<ProbeEngine>) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &engine).await {
                tracing::debug!("operator connection error: {e:#}");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, engine: &ProbeEngine) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let request: Request = operator::read_frame(&mut BufReader::new(reader)).await?;
    let response = answer(engine, request).await;
    operator::write_frame(&mut writer, &response).await
}

async fn answer(engine: &ProbeEngine, request: Request) -> Response {
    let id = request.id;
    let Some(method) = Method::parse(&request.method) else {
        return Response::err(id, METHOD_NOT_FOUND, format!("method not found: {}", request.method));
    };
    let result = match method {
        Method::Stats => serde_json::to_value(engine.stats()),
        Method::Probe => match engine.probe_now().await {
            Ok(Some(probe)) => serde_json::to_value(probe.summary()),
            Ok(None) => Ok(serde_json::json!({"finished": true})),
            Err(e) => {
                tracing::warn!("operator probe failed: {e:#}");
                return Response::err(id, PROBE_FAILED, format!("{e:#}"));
            }
        },
    };
    match result {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::err(id, PROBE_FAILED, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{call, send};
    use crate::store::SqliteStore;
    use lnprobe_core::{ChannelDirection, Store};
    use lnprobe_engine::EngineConfig;
    use lnprobe_rpc::{LightningRpc, UnixRpc};
    use serde_json::Value;

    /// Engine over an empty in-memory pool; the node socket is never dialled.
    fn engine(dir: &Path) -> Arc<ProbeEngine> {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let rpc: Arc<dyn LightningRpc> = Arc::new(UnixRpc::new(dir.join("lightning-rpc")));
        Arc::new(ProbeEngine::new(store, rpc, EngineConfig::default()))
    }

    async fn serve(dir: &Path, engine: Arc<ProbeEngine>) -> String {
        let socket = dir.join("run").join("lnprobe.sock");
        let socket = socket.to_string_lossy().into_owned();
        let listener = bind(&socket).await.unwrap();
        tokio::spawn(run_server(listener, engine));
        socket
    }

    #[tokio::test]
    async fn probe_stats_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        engine
            .lifecycle()
            .exclusions()
            .exclude_permanently(ChannelDirection::new("1x1x1", 0));
        let socket = serve(dir.path(), engine).await;

        let stats = call(&socket, Method::Stats).await.unwrap();
        assert_eq!(
            stats,
            serde_json::json!({
                "pending_probes": 0,
                "exclusions": 1,
                "temporary_exclusions": 0,
            })
        );
    }

    #[tokio::test]
    async fn probe_on_exhausted_pool_reports_finished() {
        let dir = tempfile::tempdir().unwrap();
        let socket = serve(dir.path(), engine(dir.path())).await;

        let result = call(&socket, Method::Probe).await.unwrap();
        assert_eq!(result, serde_json::json!({"finished": true}));
    }

    #[tokio::test]
    async fn unknown_method_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let socket = serve(dir.path(), engine(dir.path())).await;

        let request = Request {
            method: "listpeers".into(),
            id: Value::from(9),
            ..Request::new(Method::Stats)
        };
        let response = send(&socket, &request).await.unwrap();
        assert_eq!(response.id, Value::from(9));
        let error = response.error.expect("error body");
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert!(error.message.contains("listpeers"));
    }

    #[tokio::test]
    async fn second_daemon_cannot_bind_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = serve(dir.path(), engine(dir.path())).await;
        assert!(bind(&socket).await.is_err());
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());

        let listener = bind(&socket.to_string_lossy()).await;
        assert!(listener.is_ok());
    }
}
