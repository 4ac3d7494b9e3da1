//! Channels excluded from future route computations.
//!
//! Permanent exclusions are append-only. Temporary exclusions carry an
//! expiry and are dropped by `expire_temporary`. A channel direction lives
//! in at most one of the two collections; permanent wins.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::types::ChannelDirection;

#[derive(Debug, Default)]
struct Inner {
    permanent: Vec<ChannelDirection>,
    temporary: HashMap<ChannelDirection, DateTime<Utc>>,
}

/// Lock-guarded exclusion set, shared via `Arc` between the issuance,
/// classification and cleanup paths.
#[derive(Debug, Default)]
pub struct ExclusionSet {
    inner: Mutex<Inner>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `false` if the channel direction was already permanently excluded.
    pub fn exclude_permanently(&self, cd: ChannelDirection) -> bool {
        let mut inner = self.lock();
        inner.temporary.remove(&cd);
        if inner.permanent.contains(&cd) {
            return false;
        }
        inner.permanent.push(cd);
        true
    }

    /// Returns `false` when the channel direction is permanently excluded,
    /// in which case nothing changes. An existing temporary entry gets the
    /// new expiry.
    pub fn exclude_temporarily(&self, cd: ChannelDirection, expires_at: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        if inner.permanent.contains(&cd) {
            return false;
        }
        inner.temporary.insert(cd, expires_at);
        true
    }

    pub fn is_excluded(&self, cd: &ChannelDirection, now: DateTime<Utc>) -> bool {
        let inner = self.lock();
        inner.permanent.contains(cd) || inner.temporary.get(cd).is_some_and(|exp| *exp > now)
    }

    /// Drop temporary entries whose expiry is at or before `now`.
    /// Returns how many were removed.
    pub fn expire_temporary(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        let before = inner.temporary.len();
        inner.temporary.retain(|_, exp| *exp > now);
        before - inner.temporary.len()
    }

    /// Everything route computation must avoid: permanent entries followed by
    /// unexpired temporary ones, the latter sorted for stable output.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<ChannelDirection> {
        let inner = self.lock();
        let mut temporary: Vec<ChannelDirection> = inner
            .temporary
            .iter()
            .filter(|(_, exp)| **exp > now)
            .map(|(cd, _)| cd.clone())
            .collect();
        temporary.sort();
        let mut out = inner.permanent.clone();
        out.extend(temporary);
        out
    }

    /// `(permanent, temporary)` entry counts.
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.permanent.len(), inner.temporary.len())
    }
}
