//! lnprobe-rpc: Lightning node IO boundary.
//! The `LightningRpc` trait the engine talks to, and `UnixRpc`, which speaks
//! JSON-RPC 2.0 to the node over its unix socket. No probing logic here.

pub mod client;
pub mod error;
pub mod types;

pub use client::{LightningRpc, UnixRpc};
pub use error::{RpcError, SendPayError};
pub use types::{PaymentStatus, RouteHop};
