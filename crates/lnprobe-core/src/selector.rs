//! Candidate selection: a random pick from a bounded, id-ordered window of
//! non-terminal targets.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::store::{StoreError, TargetStore};
use crate::types::Target;

/// How many non-terminal targets are fetched per selection.
pub const CANDIDATE_WINDOW: usize = 10;

/// Pick the next probe destination. `Ok(None)` means no non-terminal target
/// is left, i.e. probing is finished.
pub fn select_candidate<S, R>(store: &S, rng: &mut R) -> Result<Option<Target>, StoreError>
where
    S: TargetStore + ?Sized,
    R: Rng + ?Sized,
{
    let candidates: Vec<Target> = store
        .candidate_targets(CANDIDATE_WINDOW)?
        .into_iter()
        .filter(|t| !t.terminal)
        .collect();
    Ok(candidates.choose(rng).cloned())
}
