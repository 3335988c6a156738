//! Invocation of a registered routine with miss recovery.
//!
//! A store may evict its cached routines at any time (Redis does on `SCRIPT FLUSH`, restart
//! or failover). The only failure handled here is that miss: the routine is registered again
//! and the same invocation is retried exactly once. Everything else, including a second
//! miss, reaches the caller.

use crate::{Invocation, Routine, ScriptStore, TierLimitError};

pub(crate) async fn invoke<S: ScriptStore + ?Sized>(
    store: &S,
    routine: &Routine,
    invocation: &Invocation<'_>,
) -> Result<i64, TierLimitError> {
    match store.eval_sha(routine.fingerprint(), invocation).await {
        Err(TierLimitError::RoutineNotFound(_)) => {}
        result => return result,
    }

    tracing::warn!(
        fingerprint = routine.fingerprint(),
        "protocol.reload, routine not found in store, reloading"
    );

    routine.register(store).await?;

    match store.eval_sha(routine.fingerprint(), invocation).await {
        Err(TierLimitError::RoutineNotFound(fingerprint)) => {
            Err(TierLimitError::RoutineNotFoundAfterReload(fingerprint))
        }
        result => result,
    }
} // end fn invoke
