use lnprobe_core::PaymentFailure;
use serde::{Deserialize, Serialize};

/// One hop of a route returned by `getroute`. Fields the engine does not
/// read are kept so the route can be handed back to `sendpay` unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteHop {
    pub id: String,
    pub channel: String,
    #[serde(default)]
    pub direction: u8,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RouteHop {
    pub fn new(id: impl Into<String>, channel: impl Into<String>, direction: u8) -> Self {
        Self {
            id: id.into(),
            channel: channel.into(),
            direction,
            extra: serde_json::Map::new(),
        }
    }
}

/// Status of a payment as reported by `listsendpays`/`waitsendpay`.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentStatus {
    Pending,
    Complete,
    Failed(PaymentFailure),
}

impl PaymentStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}
