//! Error types for the node RPC boundary.

use lnprobe_core::PaymentFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rpc call {method} timed out")]
    Timeout { method: String },

    #[error("malformed rpc payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The node answered with a JSON-RPC error object.
    #[error("rpc {method} failed ({code}): {message}")]
    Node {
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("unexpected rpc response: {0}")]
    Protocol(String),
}

impl RpcError {
    /// True when the node itself refused the call, as opposed to the node
    /// being unreachable or answering garbage.
    pub fn is_node_error(&self) -> bool {
        matches!(self, Self::Node { .. })
    }
}

#[derive(Debug, Error)]
pub enum SendPayError {
    /// The node refused the payment synchronously; carries its error data.
    #[error("sendpay rejected: {}", .0.raw)]
    Rejected(PaymentFailure),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}
