//! LightningRpc trait and UnixRpc (JSON-RPC 2.0 over the node's unix socket).
//! Connection-per-call, the same way `lightning-cli` talks to the node.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lnprobe_core::{ChannelDirection, PaymentFailure};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::error::{RpcError, SendPayError};
use crate::types::{PaymentStatus, RouteHop};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// `waitsendpay` error code when the payment is still in flight.
const WAITSENDPAY_TIMED_OUT: i64 = 200;

/// The node operations the probe engine consumes. Enables fake injection
/// for testing.
#[async_trait]
pub trait LightningRpc: Send + Sync {
    /// `getroute`. A `RpcError::Node` means the node found no path.
    async fn get_route(
        &self,
        destination: &str,
        amount_msat: u64,
        riskfactor: u64,
        exclude: &[ChannelDirection],
    ) -> Result<Vec<RouteHop>, RpcError>;

    /// `sendpay`. Returns once the node has accepted the HTLC for dispatch.
    async fn send_pay(&self, route: &[RouteHop], payment_hash: &str) -> Result<(), SendPayError>;

    /// `listsendpays`, plus `waitsendpay` to fetch the failure payload once
    /// the payment is no longer pending.
    async fn payment_status(&self, payment_hash: &str) -> Result<PaymentStatus, RpcError>;

    /// Node ids from `listnodes`.
    async fn list_nodes(&self) -> Result<Vec<String>, RpcError>;
}

/// JSON-RPC client for the node's `lightning-rpc` socket.
pub struct UnixRpc {
    socket_path: PathBuf,
    timeout: Duration,
    next_id: AtomicU64,
}

impl UnixRpc {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Issue one JSON-RPC call and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match tokio::time::timeout(self.timeout, self.call_inner(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_owned(),
            }),
        }
    }

    async fn call_inner(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut req = serde_json::to_vec(&request)?;
        req.push(b'\n');

        let mut stream = UnixStream::connect(&self.socket_path).await?;
        stream.write_all(&req).await?;
        tracing::trace!(method, id, "rpc request sent");

        let response = read_response(&mut stream).await?;
        into_result(method, response)
    }
}

#[async_trait]
impl LightningRpc for UnixRpc {
    async fn get_route(
        &self,
        destination: &str,
        amount_msat: u64,
        riskfactor: u64,
        exclude: &[ChannelDirection],
    ) -> Result<Vec<RouteHop>, RpcError> {
        let exclude: Vec<String> = exclude.iter().map(ToString::to_string).collect();
        let result = self
            .call(
                "getroute",
                json!({
                    "id": destination,
                    "amount_msat": amount_msat,
                    "riskfactor": riskfactor,
                    "exclude": exclude,
                }),
            )
            .await?;
        parse_route(result)
    }

    async fn send_pay(&self, route: &[RouteHop], payment_hash: &str) -> Result<(), SendPayError> {
        match self
            .call(
                "sendpay",
                json!({ "route": route, "payment_hash": payment_hash }),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Err(rejection_from(e)),
        }
    }

    async fn payment_status(&self, payment_hash: &str) -> Result<PaymentStatus, RpcError> {
        let listed = self
            .call("listsendpays", json!({ "payment_hash": payment_hash }))
            .await?;
        if first_payment_status(&listed)? == "pending" {
            return Ok(PaymentStatus::Pending);
        }

        match self
            .call(
                "waitsendpay",
                json!({ "payment_hash": payment_hash, "timeout": 0 }),
            )
            .await
        {
            Ok(_) => Ok(PaymentStatus::Complete),
            Err(RpcError::Node { code, .. }) if code == WAITSENDPAY_TIMED_OUT => {
                Ok(PaymentStatus::Pending)
            }
            Err(e) => match rejection_from(e) {
                SendPayError::Rejected(failure) => Ok(PaymentStatus::Failed(failure)),
                SendPayError::Rpc(e) => Err(e),
            },
        }
    }

    async fn list_nodes(&self) -> Result<Vec<String>, RpcError> {
        let result = self.call("listnodes", json!({})).await?;
        parse_node_ids(&result)
    }
}

/// Read one response. The node ends every response with a blank line
/// (`\n\n`), so lines are gathered up to that terminator and the body is
/// parsed once.
async fn read_response<S: AsyncRead + Unpin>(stream: S) -> Result<Value, RpcError> {
    let mut reader = BufReader::new(stream);
    let mut body = Vec::with_capacity(4096);
    let mut seen_content = false;
    loop {
        let start = body.len();
        if reader.read_until(b'\n', &mut body).await? == 0 {
            break;
        }
        let blank = body[start..].iter().all(u8::is_ascii_whitespace);
        if blank && seen_content {
            break;
        }
        seen_content |= !blank;
    }
    if !seen_content {
        return Err(RpcError::Protocol(
            "connection closed before a full response".to_owned(),
        ));
    }
    Ok(serde_json::from_slice(&body)?)
}

fn into_result(method: &str, response: Value) -> Result<Value, RpcError> {
    let Value::Object(mut map) = response else {
        return Err(RpcError::Protocol(format!("{method}: response is not an object")));
    };
    if let Some(error) = map.remove("error") {
        return Err(RpcError::Node {
            method: method.to_owned(),
            code: error["code"].as_i64().unwrap_or_default(),
            message: error["message"].as_str().unwrap_or_default().to_owned(),
            data: error.get("data").cloned(),
        });
    }
    map.remove("result")
        .ok_or_else(|| RpcError::Protocol(format!("{method}: neither result nor error")))
}

/// Turn a node refusal into the failure payload the classifier reads.
fn rejection_from(err: RpcError) -> SendPayError {
    match err {
        RpcError::Node {
            data: Some(data), ..
        } if data.is_object() => SendPayError::Rejected(PaymentFailure::from_error_data(data)),
        RpcError::Node { code, message, .. } => SendPayError::Rejected(
            PaymentFailure::from_error_data(json!({ "code": code, "message": message })),
        ),
        other => SendPayError::Rpc(other),
    }
}

fn parse_route(mut result: Value) -> Result<Vec<RouteHop>, RpcError> {
    let route = result
        .get_mut("route")
        .map(Value::take)
        .ok_or_else(|| RpcError::Protocol("getroute: missing route".to_owned()))?;
    Ok(serde_json::from_value(route)?)
}

fn first_payment_status(result: &Value) -> Result<&str, RpcError> {
    result["payments"]
        .as_array()
        .and_then(|payments| payments.first())
        .and_then(|p| p["status"].as_str())
        .ok_or_else(|| RpcError::Protocol("listsendpays: no payment for hash".to_owned()))
}

fn parse_node_ids(result: &Value) -> Result<Vec<String>, RpcError> {
    let nodes = result["nodes"]
        .as_array()
        .ok_or_else(|| RpcError::Protocol("listnodes: missing nodes".to_owned()))?;
    Ok(nodes
        .iter()
        .filter_map(|n| n["nodeid"].as_str().map(String::from))
        .collect())
}
