//! The store-side routines and their native counterparts.
//!
//! Each algorithm ships as a Lua routine executed atomically by Redis, and as a native
//! evaluator with the same arithmetic that [`MemoryStore`](crate::MemoryStore) runs under a
//! per-key lock. Both share one argument contract (see [`Invocation`](crate::Invocation)):
//!
//! ```text
//! KEYS[1] = event key
//! ARGV[1] = delta (count to add, or -1 to reset)
//! ARGV[2] = event namespace
//! ARGV[3] = JSON array of [max_occurrences, window_parameter, duration_resolution]
//! ARGV[4] = current unix time in seconds
//! ARGV[5] = 1 to request a wait time, 0 otherwise
//! ```
//!
//! Per-tier state lives under `<namespace>:{<key>}:<tag>:<tier index>`. The braces are a
//! Redis Cluster hash tag, so all tiers of one key share a slot.

pub(crate) mod ar1;
pub(crate) mod sliding_window;

use std::fmt;

/// Values within this distance of a threshold are treated as equal to it.
pub(crate) const TOLERANCE: f64 = 1e-9;

/// Longest expiry a routine sets on a tier key. Redis rejects `EXPIRE` values whose
/// millisecond deadline overflows, so every TTL is clamped to this.
pub(crate) const MAX_EXPIRE_SECONDS: u64 = 2_147_483_647;

/// Rate limiting algorithm executed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Exponential-decay accumulator per tier.
    Ar1,
    /// Bucketed trailing-window counter per tier.
    SlidingWindow,
}

impl Algorithm {
    /// Lua source of the routine the store executes for this algorithm.
    pub fn routine_source(self) -> &'static str {
        match self {
            Self::Ar1 => ar1::AR1_LUA,
            Self::SlidingWindow => sliding_window::SLIDING_WINDOW_LUA,
        }
    }

    pub(crate) fn from_routine_source(source: &str) -> Option<Self> {
        [Self::Ar1, Self::SlidingWindow]
            .into_iter()
            .find(|algorithm| algorithm.routine_source() == source)
    }

    /// Short tag used in store keys.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ar1 => "ar1",
            Self::SlidingWindow => "sw",
        }
    }

    /// Prefix shared by every tier key of `key`.
    pub(crate) fn slot_key(self, namespace: &str, key: &str) -> String {
        format!("{namespace}:{{{key}}}:{}", self.tag())
    }

    /// Store key holding the state of the tier at `index` (0-based) for `key`.
    ///
    /// `key` is embedded verbatim inside a Redis Cluster hash tag. On a cluster, event keys
    /// and namespaces containing `{` or `}` make the tier keys hash to a different slot
    /// than the event key and the routine fails with a non-local key error. Standalone
    /// Redis and [`MemoryStore`](crate::MemoryStore) accept any key.
    pub fn tier_key(self, namespace: &str, key: &str, index: usize) -> String {
        format!("{}:{}", self.slot_key(namespace, key), index + 1)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
