//! Operator protocol shared by the daemon socket and the CLI: one
//! JSON-RPC 2.0 object per line, one call per connection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;
pub(crate) const PROBE_FAILED: i64 = -32000;

/// Calls the daemon answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    /// Pending probe and exclusion counts.
    Stats,
    /// Launch a probe and wait for its classification.
    Probe,
}

impl Method {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Method::Stats => "probe-stats",
            Method::Probe => "probe",
        }
    }

    pub(crate) fn parse(name: &str) -> Option<Self> {
        match name {
            "probe-stats" => Some(Method::Stats),
            "probe" => Some(Method::Probe),
            _ => None,
        }
    }
}

fn jsonrpc_version() -> String {
    "2.0".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Request {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl Request {
    pub(crate) fn new(method: Method) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.name().to_owned(),
            params: Value::Object(Default::default()),
            id: Value::from(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ErrorBody {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Response {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub id: Value,
}

impl Response {
    pub(crate) fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub(crate) fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    /// The result, or the daemon's error as an `anyhow` error.
    pub(crate) fn into_result(self) -> anyhow::Result<Value> {
        if let Some(error) = self.error {
            anyhow::bail!("daemon error {}: {}", error.code, error.message);
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

pub(crate) async fn write_frame<W, T>(writer: &mut W, frame: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

pub(crate) async fn read_frame<R, T>(reader: &mut R) -> anyhow::Result<T>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        anyhow::bail!("connection closed before a full message");
    }
    Ok(serde_json::from_str(line.trim())?)
}
