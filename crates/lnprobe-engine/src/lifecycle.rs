//! Probe lifecycle: select → route → commit → dispatch → pending → classified.
//!
//! `launch` carries a probe up to dispatch. Classification happens either
//! right away (synchronous rejection) or later through the poller, which
//! hands the terminal status to `classify`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lnprobe_core::{
    Dispatched, ExclusionSet, FailureClass, MAX_PROBES_PER_TARGET, NewProbe, PROBE_AMOUNT_MSAT,
    PROBE_RISK_FACTOR, PaymentFailure, Probe, ProbeId, ProbeOutcome, ProbeStore, Store,
    StoreError, Target, classify, random_payment_hash, select_candidate,
};
use lnprobe_rpc::{LightningRpc, RouteHop, SendPayError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::tracker::{PendingProbe, PendingTracker};

/// Where a launched probe ended up.
#[derive(Debug)]
pub enum Launch {
    /// Dispatched; the poller will classify it.
    Pending { probe_id: ProbeId },
    /// Rejected at dispatch and classified on the spot.
    Finished(Probe),
    /// No non-terminal target is left.
    Exhausted,
}

pub struct Lifecycle {
    store: Arc<dyn Store>,
    rpc: Arc<dyn LightningRpc>,
    exclusions: Arc<ExclusionSet>,
    tracker: Arc<PendingTracker>,
    exclusion_duration: chrono::Duration,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        rpc: Arc<dyn LightningRpc>,
        exclusions: Arc<ExclusionSet>,
        tracker: Arc<PendingTracker>,
        exclusion_duration: Duration,
    ) -> Self {
        Self {
            store,
            rpc,
            exclusions,
            tracker,
            exclusion_duration: chrono::Duration::from_std(exclusion_duration)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn rpc(&self) -> &Arc<dyn LightningRpc> {
        &self.rpc
    }

    pub fn exclusions(&self) -> &Arc<ExclusionSet> {
        &self.exclusions
    }

    pub fn tracker(&self) -> &Arc<PendingTracker> {
        &self.tracker
    }

    /// Run a store operation on the blocking pool. Store backends do
    /// synchronous I/O and must stay off the async workers.
    pub async fn with_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }

    /// Select a target, route to it and dispatch a canary payment.
    ///
    /// Targets without a route are retired and selection moves on to the
    /// next candidate. The probe row is committed before `sendpay`. `waiter`
    /// receives the finished probe once it is classified.
    pub async fn launch(&self, waiter: Option<oneshot::Sender<Probe>>) -> anyhow::Result<Launch> {
        let (target, route) = loop {
            let candidate = self
                .with_store(|store| select_candidate(store, &mut rand::thread_rng()))
                .await?;
            let Some(target) = candidate else {
                return Ok(Launch::Exhausted);
            };
            if let Some(route) = self.compute_route(&target).await? {
                break (target, route);
            }
            let destination = target.id.clone();
            let probe = self
                .with_store(move |store| store.record_unroutable(&destination, Utc::now()))
                .await?;
            info!(destination = %target.id, probe_id = probe.id, "no route to target, retired");
        };

        let payment_hash = random_payment_hash(&mut rand::thread_rng());
        let new = NewProbe {
            destination: target.id.clone(),
            route: route.iter().map(|hop| hop.channel.clone()).collect(),
            payment_hash: payment_hash.clone(),
            started_at: Utc::now(),
        };
        let Dispatched {
            probe,
            target_retired,
        } = self
            .with_store(move |store| store.record_dispatch(&new, MAX_PROBES_PER_TARGET))
            .await?;
        if target_retired {
            info!(
                destination = %target.id,
                budget = MAX_PROBES_PER_TARGET,
                "probe budget spent, target retired"
            );
        }
        info!(
            destination = %target.id,
            probe_id = probe.id,
            hops = route.len(),
            "probing"
        );

        match self.rpc.send_pay(&route, &payment_hash).await {
            Ok(()) => {
                let pending = PendingProbe::new(probe.id, payment_hash, probe.started_at)
                    .with_waiter(waiter);
                self.tracker.insert(pending);
                Ok(Launch::Pending { probe_id: probe.id })
            }
            Err(SendPayError::Rejected(failure)) => {
                warn!(probe_id = probe.id, fail_code = ?failure.fail_code, "sendpay rejected");
                self.finish_now(probe.id, failure, waiter).await
            }
            Err(SendPayError::Rpc(e)) => {
                // Whether the HTLC left is unknown; record the transport error.
                warn!(probe_id = probe.id, "sendpay failed: {e}");
                let failure = PaymentFailure::from_error_data(serde_json::json!({
                    "message": e.to_string(),
                }));
                self.finish_now(probe.id, failure, waiter).await
            }
        }
    }

    /// `Ok(None)` when the node has no path to the target. Transport errors
    /// propagate so the target is not retired because the node is down.
    async fn compute_route(&self, target: &Target) -> anyhow::Result<Option<Vec<RouteHop>>> {
        let exclude = self.exclusions.snapshot(Utc::now());
        match self
            .rpc
            .get_route(&target.id, PROBE_AMOUNT_MSAT, PROBE_RISK_FACTOR, &exclude)
            .await
        {
            Ok(route) if !route.is_empty() => Ok(Some(route)),
            Ok(_) => Ok(None),
            Err(e) if e.is_node_error() => {
                debug!(destination = %target.id, "getroute: {e}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finish_now(
        &self,
        probe_id: ProbeId,
        failure: PaymentFailure,
        waiter: Option<oneshot::Sender<Probe>>,
    ) -> anyhow::Result<Launch> {
        let finished = self.classify(probe_id, Some(&failure), Utc::now()).await?;
        if let Some(waiter) = waiter {
            let _ = waiter.send(finished.clone());
        }
        Ok(Launch::Finished(finished))
    }

    /// Apply a terminal payment status to a probe. `failure` is `None` when
    /// the payment completed. Exclusions are updated first, then the probe's
    /// terminal fields and any target retirement are committed together.
    pub async fn classify(
        &self,
        probe_id: ProbeId,
        failure: Option<&PaymentFailure>,
        now: DateTime<Utc>,
    ) -> Result<Probe, StoreError> {
        let classification = classify(failure);

        match (classification.class, classification.exclusion) {
            (FailureClass::PermanentExclusion, Some(cd)) => {
                let channel = cd.to_string();
                if self.exclusions.exclude_permanently(cd) {
                    let (total, _) = self.exclusions.counts();
                    info!(channel = %channel, total, "adding exclusion");
                }
            }
            (FailureClass::TemporaryExclusion, Some(cd)) => {
                let channel = cd.to_string();
                let expires_at = now
                    .checked_add_signed(self.exclusion_duration)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                if self.exclusions.exclude_temporarily(cd, expires_at) {
                    let (_, total) = self.exclusions.counts();
                    info!(channel = %channel, total, %expires_at, "adding temporary exclusion");
                }
            }
            (FailureClass::PermanentExclusion | FailureClass::TemporaryExclusion, None) => {
                warn!(probe_id, "failure names no erring channel direction, nothing excluded");
            }
            (FailureClass::Reached | FailureClass::Informational, _) => {}
        }

        let outcome = match failure {
            Some(f) => ProbeOutcome::from_failure(f, now),
            None => ProbeOutcome::completed(now),
        };
        let finalize_target = classification.finalize_target;
        let probe = self
            .with_store(move |store| store.record_outcome(probe_id, &outcome, finalize_target))
            .await?;
        if finalize_target {
            info!(destination = %probe.destination, probe_id, "destination reached, target retired");
        }
        debug!(probe_id, class = ?classification.class, fail_code = ?probe.fail_code, "probe classified");
        Ok(probe)
    }

    /// Force-classify tracked probes pending for at least `timeout`.
    /// Returns how many were expired.
    pub async fn expire_stale(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return 0;
        };
        let mut expired = 0;
        for entry in self.tracker.snapshot() {
            if entry.started_at.checked_add_signed(timeout).is_none_or(|due| due > now) {
                continue;
            }
            let Some(pending) = self.tracker.take(entry.probe_id) else {
                continue;
            };
            let probe_id = entry.probe_id;
            let recorded = self
                .with_store(move |store| {
                    store.record_outcome(probe_id, &ProbeOutcome::timed_out(now), false)
                })
                .await;
            match recorded {
                Ok(probe) => {
                    warn!(probe_id = probe.id, destination = %probe.destination, "probe timed out while pending");
                    pending.resolve(&probe);
                    expired += 1;
                }
                Err(e) => {
                    warn!(probe_id = entry.probe_id, "failed to record probe timeout: {e}");
                    self.tracker.insert(pending);
                }
            }
        }
        expired
    }

    /// Re-track probes the store still lists as in flight, e.g. after a
    /// restart. Returns how many were added.
    pub async fn recover_pending(&self) -> Result<usize, StoreError> {
        let mut recovered = 0;
        for probe in self.with_store(|store| store.pending_probes()).await? {
            let Some(hash) = probe.payment_hash.clone() else {
                continue;
            };
            if self
                .tracker
                .insert(PendingProbe::new(probe.id, hash, probe.started_at))
            {
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}
