//! Pending-probe polling.

use chrono::Utc;
use lnprobe_rpc::PaymentStatus;
use tracing::{debug, warn};

use crate::lifecycle::Lifecycle;

/// What one polling pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub resolved: usize,
    pub still_pending: usize,
    pub errors: usize,
}

/// Query the node for every tracked probe and classify the ones that
/// reached a terminal status. A failure on one probe is logged and the pass
/// continues with the next.
pub async fn poll_pending(lifecycle: &Lifecycle) -> PollReport {
    let mut report = PollReport::default();

    for entry in lifecycle.tracker().snapshot() {
        let status = match lifecycle.rpc().payment_status(&entry.payment_hash).await {
            Ok(status) => status,
            Err(e) => {
                warn!(probe_id = entry.probe_id, "payment status query failed: {e}");
                report.errors += 1;
                continue;
            }
        };

        let failure = match status {
            PaymentStatus::Pending => {
                report.still_pending += 1;
                continue;
            }
            PaymentStatus::Complete => None,
            PaymentStatus::Failed(failure) => Some(failure),
        };

        // Whoever takes the entry classifies it.
        let Some(pending) = lifecycle.tracker().take(entry.probe_id) else {
            continue;
        };
        match lifecycle.classify(entry.probe_id, failure.as_ref(), Utc::now()).await {
            Ok(probe) => {
                debug!(probe_id = probe.id, fail_code = ?probe.fail_code, "pending probe resolved");
                pending.resolve(&probe);
                report.resolved += 1;
            }
            Err(e) => {
                warn!(probe_id = entry.probe_id, "failed to record probe outcome: {e}");
                lifecycle.tracker().insert(pending);
                report.errors += 1;
            }
        }
    }

    report
}
