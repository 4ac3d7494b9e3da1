//! In-flight probe bookkeeping shared by dispatch units and the poller.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lnprobe_core::{Probe, ProbeId};
use tokio::sync::oneshot;

/// A dispatched probe awaiting a terminal payment status.
#[derive(Debug)]
pub struct PendingProbe {
    pub probe_id: ProbeId,
    pub payment_hash: String,
    pub started_at: DateTime<Utc>,
    /// Handed the finished probe when somebody asked to wait for it.
    pub waiter: Option<oneshot::Sender<Probe>>,
}

impl PendingProbe {
    pub fn new(probe_id: ProbeId, payment_hash: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            probe_id,
            payment_hash: payment_hash.into(),
            started_at,
            waiter: None,
        }
    }

    #[must_use]
    pub fn with_waiter(mut self, waiter: Option<oneshot::Sender<Probe>>) -> Self {
        self.waiter = waiter;
        self
    }

    /// Deliver the finished probe to the waiter, if any.
    pub fn resolve(self, probe: &Probe) {
        if let Some(waiter) = self.waiter {
            // The waiter may have given up; nothing to do then.
            let _ = waiter.send(probe.clone());
        }
    }

    fn entry(&self) -> PendingEntry {
        PendingEntry {
            probe_id: self.probe_id,
            payment_hash: self.payment_hash.clone(),
            started_at: self.started_at,
        }
    }
}

/// Copy of a tracked probe's identity, taken without holding the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub probe_id: ProbeId,
    pub payment_hash: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PendingTracker {
    inner: Mutex<HashMap<ProbeId, PendingProbe>>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProbeId, PendingProbe>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a probe. Returns `false` (and keeps the existing entry) when the
    /// probe id is already tracked.
    pub fn insert(&self, probe: PendingProbe) -> bool {
        let mut inner = self.lock();
        if inner.contains_key(&probe.probe_id) {
            return false;
        }
        inner.insert(probe.probe_id, probe);
        true
    }

    /// Remove a probe, handing ownership to the caller that will classify it.
    /// Only one caller can win.
    pub fn take(&self, probe_id: ProbeId) -> Option<PendingProbe> {
        self.lock().remove(&probe_id)
    }

    pub fn contains(&self, probe_id: ProbeId) -> bool {
        self.lock().contains_key(&probe_id)
    }

    /// Tracked probes ordered by id (i.e. dispatch order).
    pub fn snapshot(&self) -> Vec<PendingEntry> {
        let mut entries: Vec<PendingEntry> = self.lock().values().map(PendingProbe::entry).collect();
        entries.sort_by_key(|e| e.probe_id);
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
