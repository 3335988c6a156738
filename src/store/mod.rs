//! The atomic-execution store the limiter runs its routines in.
//!
//! A store must run one submitted routine to completion without interleaving other callers
//! on the same key. Redis does this for Lua scripts; [`MemoryStore`] does it with a per-key
//! lock.

mod memory_store;
pub use memory_store::*;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
mod redis_store;
#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
pub use redis_store::*;

use async_trait::async_trait;

use crate::TierLimitError;

/// Arguments of one routine invocation, in the order the routine reads them.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Event key, passed as the single `KEYS` entry.
    pub key: &'a str,
    /// Occurrences to add, or `-1` to reset the key.
    pub delta: i64,
    /// Event namespace.
    pub namespace: &'a str,
    /// JSON array of `[max_occurrences, window_parameter, duration_resolution]` triples.
    pub serialized_tiers: &'a str,
    /// Current unix time in seconds. Ignored on reset.
    pub timestamp_seconds: u64,
    /// Whether a denied call should report a wait time instead of `1`. Ignored on reset.
    pub want_wait_time: bool,
}

impl Invocation<'_> {
    /// Sentinel `delta` meaning "clear every tier of this key".
    pub const RESET: i64 = -1;

    /// Whether this invocation clears the key instead of evaluating it.
    pub fn is_reset(&self) -> bool {
        self.delta < 0
    }
}

/// A store able to register and execute routines atomically.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Install `source` and return the fingerprint the store addresses it by.
    ///
    /// Registering identical source again must be a no-op returning the same fingerprint.
    async fn load_script(&self, source: &str) -> Result<String, TierLimitError>;

    /// Execute the routine registered under `fingerprint`.
    ///
    /// Returns [`TierLimitError::RoutineNotFound`] when no routine matches `fingerprint`.
    async fn eval_sha(
        &self,
        fingerprint: &str,
        invocation: &Invocation<'_>,
    ) -> Result<i64, TierLimitError>;
}

#[async_trait]
impl<S: ScriptStore + ?Sized> ScriptStore for std::sync::Arc<S> {
    async fn load_script(&self, source: &str) -> Result<String, TierLimitError> {
        (**self).load_script(source).await
    }

    async fn eval_sha(
        &self,
        fingerprint: &str,
        invocation: &Invocation<'_>,
    ) -> Result<i64, TierLimitError> {
        (**self).eval_sha(fingerprint, invocation).await
    }
}
