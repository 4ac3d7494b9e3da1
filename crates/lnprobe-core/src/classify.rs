//! Failure-code classification.
//!
//! Which onion failure codes feed back into routing is table data, so new
//! codes can be grouped without touching the lifecycle control flow.

use serde::{Deserialize, Serialize};

use crate::types::{ChannelDirection, PaymentFailure};

// ─── Failure codes ────────────────────────────────────────────────

/// Recorded when route computation finds no path to the destination.
pub const NO_ROUTE: i64 = -1;
pub const POLICY_MISMATCH: i64 = 21;
pub const FEE_INSUFFICIENT: i64 = 4103;
pub const PERMANENT_CHANNEL_FAILURE: i64 = 16392;
pub const TEMPORARY_CHANNEL_FAILURE: i64 = 16394;
/// The destination saw the HTLC but did not know the (random) payment hash.
pub const UNKNOWN_PAYMENT_DETAILS: i64 = 16399;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Exclude the erring channel for the lifetime of the process.
    PermanentExclusion,
    /// Exclude the erring channel until the exclusion duration elapses.
    TemporaryExclusion,
    /// The probe reached its destination; the target is fully probed.
    Reached,
    /// Recorded only.
    Informational,
}

pub const FAILURE_TABLE: &[(i64, FailureClass)] = &[
    (PERMANENT_CHANNEL_FAILURE, FailureClass::PermanentExclusion),
    (TEMPORARY_CHANNEL_FAILURE, FailureClass::PermanentExclusion),
    (POLICY_MISMATCH, FailureClass::TemporaryExclusion),
    (FEE_INSUFFICIENT, FailureClass::TemporaryExclusion),
    (UNKNOWN_PAYMENT_DETAILS, FailureClass::Reached),
];

pub fn classify_fail_code(code: Option<i64>) -> FailureClass {
    code.and_then(|code| {
        FAILURE_TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, class)| *class)
    })
    .unwrap_or(FailureClass::Informational)
}

/// The side effects a terminal payment status implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub class: FailureClass,
    /// Channel to exclude; `None` for non-exclusion classes or when the
    /// payload did not name the erring channel and direction.
    pub exclusion: Option<ChannelDirection>,
    /// Whether the destination target becomes terminal.
    pub finalize_target: bool,
}

/// Classify a terminal payment status. `None` means the payment completed.
pub fn classify(failure: Option<&PaymentFailure>) -> Classification {
    let class = classify_fail_code(failure.and_then(|f| f.fail_code));
    let exclusion = match class {
        FailureClass::PermanentExclusion | FailureClass::TemporaryExclusion => {
            failure.and_then(PaymentFailure::channel_direction)
        }
        FailureClass::Reached | FailureClass::Informational => None,
    };
    Classification {
        class,
        exclusion,
        finalize_target: class == FailureClass::Reached,
    }
}
