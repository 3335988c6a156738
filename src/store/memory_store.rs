use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    Invocation, ScriptStore, TierLimitError,
    algorithm::{
        Algorithm,
        ar1::{self, DecayCounter},
        sliding_window::{self, BucketCounter},
    },
    tiers::parse_serialized_tiers,
};

#[derive(Debug)]
enum SlotState {
    Decay(Vec<Option<DecayCounter>>),
    Window(Vec<Option<BucketCounter>>),
}

impl SlotState {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Ar1 => Self::Decay(Vec::new()),
            Algorithm::SlidingWindow => Self::Window(Vec::new()),
        }
    }

    fn matches(&self, algorithm: Algorithm) -> bool {
        matches!(
            (self, algorithm),
            (Self::Decay(_), Algorithm::Ar1) | (Self::Window(_), Algorithm::SlidingWindow)
        )
    }

    fn expire(&mut self, now: u64) {
        match self {
            Self::Decay(counters) => expire_counters(counters, now, |c| c.expires_at),
            Self::Window(counters) => expire_counters(counters, now, |c| c.expires_at),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Decay(counters) => counters.iter().all(Option::is_none),
            Self::Window(counters) => counters.iter().all(Option::is_none),
        }
    }

    fn evaluate(&mut self, tiers: &[[f64; 3]], delta: u64, now: u64, want_wait_time: bool) -> u64 {
        self.expire(now);

        match self {
            Self::Decay(counters) => {
                counters.resize(counters.len().max(tiers.len()), None);
                ar1::evaluate(counters, tiers, delta, now, want_wait_time)
            }
            Self::Window(counters) => {
                counters.resize(counters.len().max(tiers.len()), None);
                sliding_window::evaluate(counters, tiers, delta, now, want_wait_time)
            }
        }
    }
}

#[inline]
fn expire_counters<T>(
    counters: &mut [Option<T>],
    now: u64,
    expires_at: impl Fn(&T) -> Option<u64>,
) {
    for counter in counters.iter_mut() {
        if counter
            .as_ref()
            .and_then(&expires_at)
            .is_some_and(|expires_at| expires_at <= now)
        {
            *counter = None;
        }
    }
}

/// In-process store that executes this crate's routines natively.
///
/// Evaluations of one event key run to completion while holding that key's
/// [`DashMap`](dashmap::DashMap) entry, which gives the same per-key linearizability Redis
/// gives Lua scripts. Calls on different keys proceed in parallel.
///
/// Only the routines shipped with this crate can be registered; any other source is
/// rejected with [`TierLimitError::StoreError`]. Expiry follows the timestamps passed in
/// invocations rather than a clock of its own.
///
/// Expired state is dropped when its key is next evaluated. Keys that are never touched
/// again stay in memory until [`MemoryStore::purge_expired`] runs, so long-lived processes
/// should call it periodically (for example from an interval task).
///
/// # Examples
///
/// ```
/// use tierlimit::{
///     DurationResolution, EventNamespace, LimitDuration, MaxOccurrences, MemoryStore,
///     RateLimiter, RateLimiterOptions, TierSet, WindowTier,
/// };
///
/// # let rt = tokio::runtime::Runtime::new().unwrap();
/// # rt.block_on(async {
/// let limiter = RateLimiter::new(
///     RateLimiterOptions {
///         namespace: EventNamespace::try_from("login").unwrap(),
///         tiers: TierSet::SlidingWindow(vec![WindowTier {
///             max_occurrences: MaxOccurrences::try_from(3.0).unwrap(),
///             limit_duration: LimitDuration::try_from(60.0).unwrap(),
///             duration_resolution: DurationResolution::default(),
///         }]),
///     },
///     MemoryStore::new(),
/// )
/// .unwrap();
///
/// limiter.register().await.unwrap();
/// assert_eq!(limiter.is_exceeded("10.0.0.1", 3, false).await.unwrap(), 0);
/// assert_ne!(limiter.is_exceeded("10.0.0.1", 1, false).await.unwrap(), 0);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    routines: DashMap<String, Algorithm>,
    slots: DashMap<String, SlotState>,
}

impl MemoryStore {
    /// Create an empty store with no registered routines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every registered routine, like Redis `SCRIPT FLUSH`.
    ///
    /// Counter state is kept.
    pub fn flush_routines(&self) {
        self.routines.clear();
    }

    /// Number of event keys holding state, expired or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no event key holds state.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop tier state that expired at or before `now_seconds`, and keys left without any.
    ///
    /// Returns the number of keys removed.
    pub fn purge_expired(&self, now_seconds: u64) -> usize {
        let before = self.slots.len();

        self.slots.retain(|_, slot| {
            slot.expire(now_seconds);
            !slot.is_empty()
        });

        before.saturating_sub(self.slots.len())
    } // end method purge_expired
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn load_script(&self, source: &str) -> Result<String, TierLimitError> {
        let Some(algorithm) = Algorithm::from_routine_source(source) else {
            return Err(TierLimitError::StoreError(
                "unsupported routine: only the routines shipped with tierlimit can be loaded"
                    .to_string(),
            ));
        };

        let fingerprint = redis::Script::new(source).get_hash().to_string();
        self.routines.insert(fingerprint.clone(), algorithm);

        Ok(fingerprint)
    }

    async fn eval_sha(
        &self,
        fingerprint: &str,
        invocation: &Invocation<'_>,
    ) -> Result<i64, TierLimitError> {
        let Some(algorithm) = self.routines.get(fingerprint).map(|entry| *entry) else {
            return Err(TierLimitError::RoutineNotFound(fingerprint.to_string()));
        };

        let tiers = parse_serialized_tiers(invocation.serialized_tiers)?;
        let slot_key = algorithm.slot_key(invocation.namespace, invocation.key);

        if invocation.is_reset() {
            self.slots.remove(&slot_key);
            return Ok(0);
        }

        let result = {
            let mut slot = self
                .slots
                .entry(slot_key.clone())
                .or_insert_with(|| SlotState::new(algorithm));

            if !slot.matches(algorithm) {
                *slot = SlotState::new(algorithm);
            }

            slot.evaluate(
                &tiers,
                invocation.delta as u64,
                invocation.timestamp_seconds,
                invocation.want_wait_time,
            )
        };

        self.slots.remove_if(&slot_key, |_, slot| slot.is_empty());

        Ok(result as i64)
    }
}
