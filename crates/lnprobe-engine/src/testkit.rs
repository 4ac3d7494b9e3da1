//! In-memory store and scripted node used by the engine tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::ThreadId;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lnprobe_core::classify::NO_ROUTE;
use lnprobe_core::{
    ChannelDirection, Dispatched, NewProbe, PaymentFailure, Probe, ProbeId, ProbeOutcome, ProbeStore,
    StoreError, Target, TargetStore,
};
use lnprobe_rpc::{LightningRpc, PaymentStatus, RouteHop, RpcError, SendPayError};

#[derive(Default)]
struct MemoryState {
    targets: BTreeMap<String, bool>,
    probes: Vec<Probe>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
    /// Thread of every trait call, in call order.
    callers: Mutex<Vec<ThreadId>>,
}

impl MemoryStore {
    pub(crate) fn with_targets(ids: &[&str]) -> Self {
        let store = Self::default();
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        store.seed_targets(&ids).unwrap();
        store
    }

    pub(crate) fn is_terminal(&self, id: &str) -> bool {
        self.state.lock().unwrap().targets.get(id).copied().unwrap_or(false)
    }

    pub(crate) fn probes(&self) -> Vec<Probe> {
        self.state.lock().unwrap().probes.clone()
    }

    pub(crate) fn callers(&self) -> Vec<ThreadId> {
        self.callers.lock().unwrap().clone()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.callers.lock().unwrap().push(std::thread::current().id());
        self.state.lock().unwrap()
    }

    fn finalize(state: &mut MemoryState, id: &str) -> Result<(), StoreError> {
        match state.targets.get_mut(id) {
            Some(t) => {
                *t = true;
                Ok(())
            }
            None => Err(StoreError::UnknownTarget(id.to_string())),
        }
    }
}

impl TargetStore for MemoryStore {
    fn count_targets(&self) -> Result<u64, StoreError> {
        Ok(self.state().targets.len() as u64)
    }

    fn seed_targets(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut state = self.state();
        if !state.targets.is_empty() {
            return Ok(0);
        }
        for id in ids {
            state.targets.insert(id.clone(), false);
        }
        Ok(state.targets.len())
    }

    fn candidate_targets(&self, limit: usize) -> Result<Vec<Target>, StoreError> {
        Ok(self
            .state()
            .targets
            .iter()
            .filter(|(_, terminal)| !**terminal)
            .take(limit)
            .map(|(id, _)| Target::new(id.clone()))
            .collect())
    }

    fn get_target(&self, id: &str) -> Result<Option<Target>, StoreError> {
        Ok(self.state().targets.get(id).map(|t| Target {
            id: id.to_string(),
            terminal: *t,
        }))
    }

    fn mark_terminal(&self, id: &str) -> Result<(), StoreError> {
        Self::finalize(&mut self.state(), id)
    }
}

impl ProbeStore for MemoryStore {
    fn probe_count(&self, destination: &str) -> Result<u64, StoreError> {
        Ok(self
            .state()
            .probes
            .iter()
            .filter(|p| p.destination == destination)
            .count() as u64)
    }

    fn record_unroutable(&self, destination: &str, at: DateTime<Utc>) -> Result<Probe, StoreError> {
        let mut state = self.state();
        Self::finalize(&mut state, destination)?;
        let probe = Probe {
            id: state.probes.len() as ProbeId + 1,
            destination: destination.to_string(),
            route: Vec::new(),
            payment_hash: None,
            error: None,
            erring_channel: None,
            fail_code: Some(NO_ROUTE),
            started_at: at,
            finished_at: Some(at),
        };
        state.probes.push(probe.clone());
        Ok(probe)
    }

    fn record_dispatch(&self, new: &NewProbe, budget: u64) -> Result<Dispatched, StoreError> {
        let mut state = self.state();
        let attempts = state
            .probes
            .iter()
            .filter(|p| p.destination == new.destination)
            .count() as u64
            + 1;
        let target_retired = attempts > budget;
        if target_retired {
            Self::finalize(&mut state, &new.destination)?;
        }
        let probe = Probe {
            id: state.probes.len() as ProbeId + 1,
            destination: new.destination.clone(),
            route: new.route.clone(),
            payment_hash: Some(new.payment_hash.clone()),
            error: None,
            erring_channel: None,
            fail_code: None,
            started_at: new.started_at,
            finished_at: None,
        };
        state.probes.push(probe.clone());
        Ok(Dispatched {
            probe,
            target_retired,
        })
    }

    fn record_outcome(
        &self,
        id: ProbeId,
        outcome: &ProbeOutcome,
        finalize_target: bool,
    ) -> Result<Probe, StoreError> {
        let mut state = self.state();
        let idx = state
            .probes
            .iter()
            .position(|p| p.id == id)
            .ok_or(StoreError::UnknownProbe(id))?;
        if finalize_target {
            let destination = state.probes[idx].destination.clone();
            Self::finalize(&mut state, &destination)?;
        }
        let probe = &mut state.probes[idx];
        probe.error.clone_from(&outcome.error);
        probe.erring_channel.clone_from(&outcome.erring_channel);
        probe.fail_code = outcome.fail_code;
        probe.finished_at = Some(outcome.finished_at);
        Ok(probe.clone())
    }

    fn get_probe(&self, id: ProbeId) -> Result<Option<Probe>, StoreError> {
        Ok(self.state().probes.iter().find(|p| p.id == id).cloned())
    }

    fn pending_probes(&self) -> Result<Vec<Probe>, StoreError> {
        Ok(self
            .state()
            .probes
            .iter()
            .filter(|p| p.is_pending())
            .cloned()
            .collect())
    }
}

/// Scripted node. Routes every destination over a single hop unless told
/// otherwise; payments stay pending until a status is set for their hash.
#[derive(Default)]
pub(crate) struct FakeRpc {
    no_route: AtomicBool,
    offline: AtomicBool,
    /// Synchronous `sendpay` rejections keyed by destination.
    rejections: Mutex<HashMap<String, PaymentFailure>>,
    statuses: Mutex<HashMap<String, PaymentStatus>>,
    sent: Mutex<Vec<(String, String)>>,
    excludes_seen: Mutex<Vec<Vec<ChannelDirection>>>,
    nodes: Vec<String>,
}

impl FakeRpc {
    pub(crate) fn routing() -> Self {
        Self::default()
    }

    pub(crate) fn no_route() -> Self {
        let rpc = Self::default();
        rpc.no_route.store(true, Ordering::SeqCst);
        rpc
    }

    pub(crate) fn with_nodes(ids: &[&str]) -> Self {
        Self {
            nodes: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn reject(&self, destination: &str, failure: PaymentFailure) {
        self.rejections
            .lock()
            .unwrap()
            .insert(destination.to_string(), failure);
    }

    pub(crate) fn set_status(&self, payment_hash: &str, status: PaymentStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(payment_hash.to_string(), status);
    }

    /// `(destination, payment_hash)` for every accepted `sendpay`.
    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn excludes_seen(&self) -> Vec<Vec<ChannelDirection>> {
        self.excludes_seen.lock().unwrap().clone()
    }

    fn check_online(&self, method: &str) -> Result<(), RpcError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{method}: node offline"),
            )));
        }
        Ok(())
    }
}

pub(crate) fn failure(code: i64, channel: &str, direction: u8) -> PaymentFailure {
    PaymentFailure::from_error_data(serde_json::json!({
        "failcode": code,
        "erring_channel": channel,
        "erring_direction": direction,
    }))
}

#[async_trait]
impl LightningRpc for FakeRpc {
    async fn get_route(
        &self,
        destination: &str,
        _amount_msat: u64,
        _riskfactor: u64,
        exclude: &[ChannelDirection],
    ) -> Result<Vec<RouteHop>, RpcError> {
        self.check_online("getroute")?;
        self.excludes_seen.lock().unwrap().push(exclude.to_vec());
        if self.no_route.load(Ordering::SeqCst) {
            return Err(RpcError::Node {
                method: "getroute".into(),
                code: 205,
                message: "Could not find a route".into(),
                data: None,
            });
        }
        Ok(vec![RouteHop::new(destination, format!("chan-{destination}"), 0)])
    }

    async fn send_pay(&self, route: &[RouteHop], payment_hash: &str) -> Result<(), SendPayError> {
        self.check_online("sendpay")?;
        let destination = route.last().map(|h| h.id.clone()).unwrap_or_default();
        if let Some(f) = self.rejections.lock().unwrap().get(&destination) {
            return Err(SendPayError::Rejected(f.clone()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination, payment_hash.to_string()));
        Ok(())
    }

    async fn payment_status(&self, payment_hash: &str) -> Result<PaymentStatus, RpcError> {
        self.check_online("listsendpays")?;
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(payment_hash)
            .cloned()
            .unwrap_or(PaymentStatus::Pending))
    }

    async fn list_nodes(&self) -> Result<Vec<String>, RpcError> {
        self.check_online("listnodes")?;
        Ok(self.nodes.clone())
    }
}
