//! State merge strategy injected into schedulers

use crate::error::SquashError;
use weft_types::{ContextId, StateHash};

/// Merges execution contexts onto a state root
///
/// `squash` applies the state changes of `context_ids` (and, transitively, of their
/// base contexts) on top of `state_root`. Earlier ids take priority on conflicting
/// writes. With `persist` the result is committed; with `clean_up` the contexts are
/// released afterwards.
pub trait SquashHandler: Send + Sync {
    /// Merge contexts and return the resulting state hash
    fn squash(
        &self,
        state_root: &StateHash,
        context_ids: &[ContextId],
        persist: bool,
        clean_up: bool,
    ) -> Result<StateHash, SquashError>;
}

impl<F> SquashHandler for F
where
    F: Fn(&StateHash, &[ContextId], bool, bool) -> Result<StateHash, SquashError> + Send + Sync,
{
    fn squash(
        &self,
        state_root: &StateHash,
        context_ids: &[ContextId],
        persist: bool,
        clean_up: bool,
    ) -> Result<StateHash, SquashError> {
        self(state_root, context_ids, persist, clean_up)
    }
}
