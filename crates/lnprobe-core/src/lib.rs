//! lnprobe-core: probe domain model.
//! Targets, probes, failure classification, the channel exclusion set and
//! the candidate selection policy. No IO, no async.

pub mod classify;
pub mod exclusion;
pub mod selector;
pub mod store;
pub mod types;

pub use classify::{Classification, FailureClass, classify, classify_fail_code};
pub use exclusion::ExclusionSet;
pub use selector::{CANDIDATE_WINDOW, select_candidate};
pub use store::{Dispatched, ProbeStore, Store, StoreError, TargetStore};
pub use types::*;
