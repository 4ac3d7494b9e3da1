//! Repository interfaces for targets and probes.
//!
//! The two `record_*` commit points that touch both a probe and its target
//! must be atomic in implementations.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{NewProbe, Probe, ProbeId, ProbeOutcome, Target};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("unknown probe {0}")]
    UnknownProbe(ProbeId),

    #[error("unknown target {0}")]
    UnknownTarget(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// A probe committed ahead of dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub probe: Probe,
    /// The probe spent the target's budget and the target was retired.
    pub target_retired: bool,
}

pub trait TargetStore: Send + Sync {
    fn count_targets(&self) -> Result<u64, StoreError>;

    /// Insert one non-terminal target per id, but only if the pool is empty.
    /// Returns the number of targets inserted.
    fn seed_targets(&self, ids: &[String]) -> Result<usize, StoreError>;

    /// Up to `limit` non-terminal targets, ordered by id.
    fn candidate_targets(&self, limit: usize) -> Result<Vec<Target>, StoreError>;

    fn get_target(&self, id: &str) -> Result<Option<Target>, StoreError>;

    fn mark_terminal(&self, id: &str) -> Result<(), StoreError>;
}

pub trait ProbeStore: Send + Sync {
    /// Number of probes ever recorded against `destination`.
    fn probe_count(&self, destination: &str) -> Result<u64, StoreError>;

    /// Record a probe for which no route was found and retire its target,
    /// in one transaction. The probe is stored finished with fail code -1.
    fn record_unroutable(&self, destination: &str, at: DateTime<Utc>)
    -> Result<Probe, StoreError>;

    /// Record a routed probe ahead of dispatch. The target's probe count is
    /// read in the same transaction; when it exceeds `budget` with this
    /// probe included, the target is retired in that transaction too.
    fn record_dispatch(&self, probe: &NewProbe, budget: u64) -> Result<Dispatched, StoreError>;

    /// Write a probe's terminal fields, retiring its target in the same
    /// transaction when `finalize_target` is set.
    fn record_outcome(
        &self,
        id: ProbeId,
        outcome: &ProbeOutcome,
        finalize_target: bool,
    ) -> Result<Probe, StoreError>;

    fn get_probe(&self, id: ProbeId) -> Result<Option<Probe>, StoreError>;

    /// Dispatched probes with no terminal fields yet.
    fn pending_probes(&self) -> Result<Vec<Probe>, StoreError>;
}

/// Both repositories behind one handle.
pub trait Store: TargetStore + ProbeStore {}

impl<T: TargetStore + ProbeStore + ?Sized> Store for T {}
