//! CLI side of the operator socket.

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::operator::{self, Method, Request, Response};

/// Send one request to the daemon and read its response.
pub(crate) async fn send(socket_path: &str, request: &Request) -> anyhow::Result<Response> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;
    let (reader, mut writer) = stream.into_split();
    operator::write_frame(&mut writer, request).await?;
    writer.shutdown().await?;
    operator::read_frame(&mut BufReader::new(reader)).await
}

pub(crate) async fn call(socket_path: &str, method: Method) -> anyhow::Result<serde_json::Value> {
    send(socket_path, &Request::new(method)).await?.into_result()
}

/// `lnprobe stats`: pending probe and exclusion counts.
pub async fn cmd_stats(socket_path: &str) -> anyhow::Result<()> {
    let stats = call(socket_path, Method::Stats).await?;
    println!("{}", format_stats(&stats));
    Ok(())
}

/// `lnprobe probe`: issue a probe and print the classified result as JSON.
pub async fn cmd_probe(socket_path: &str) -> anyhow::Result<()> {
    let probe = call(socket_path, Method::Probe).await?;
    println!("{}", serde_json::to_string_pretty(&probe)?);
    Ok(())
}

pub(crate) fn format_stats(stats: &serde_json::Value) -> String {
    let field = |name: &str| stats[name].as_u64().unwrap_or(0);
    format!(
        "pending probes: {}\nexclusions: {}\ntemporary exclusions: {}",
        field("pending_probes"),
        field("exclusions"),
        field("temporary_exclusions"),
    )
}
