//! Limiter facade.
//!
//! [`RateLimiter`] validates input, marshals the tier configuration and drives the store
//! routine for the algorithm selected by its [`TierSet`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    Clock, EventNamespace, Invocation, RateLimitDecision, Routine, ScriptStore, SystemClock,
    TierLimitError, TierSet, algorithm::Algorithm, protocol,
};

/// Configuration for [`RateLimiter`].
///
/// Deserializable, so hosts can keep limits in their own config files:
///
/// ```
/// use tierlimit::{RateLimiterOptions, TierSet};
///
/// let options: RateLimiterOptions = serde_json::from_str(r#"{
///     "namespace": "ipRateLimit",
///     "tiers": {
///         "algorithm": "sliding_window",
///         "tiers": [
///             { "max_occurrences": 1, "limit_duration": 5, "duration_resolution": 1 },
///             { "max_occurrences": 5, "limit_duration": 3600, "duration_resolution": 1 }
///         ]
///     }
/// }"#).unwrap();
///
/// assert!(matches!(options.tiers, TierSet::SlidingWindow(ref tiers) if tiers.len() == 2));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterOptions {
    /// Namespace scoping every event key of this limiter.
    ///
    /// Limiters sharing a store must use distinct namespaces unless they are meant to share
    /// counters.
    pub namespace: EventNamespace,

    /// Ordered, non-empty tier list. Its variant selects the algorithm.
    pub tiers: TierSet,
}

/// Distributed multi-tier rate limiter.
///
/// All check-and-increment work happens inside the store, in one routine invocation per
/// call, so concurrent callers in any number of processes never race each other. The limiter
/// itself holds no mutable state and can be shared freely (e.g. behind an [`Arc`]).
///
/// # Examples
///
/// ```
/// use tierlimit::{
///     DecayFactor, DecayTier, DurationResolution, EventNamespace, ManualClock,
///     MaxOccurrences, MemoryStore, RateLimitDecision, RateLimiter, RateLimiterOptions,
///     TierSet,
/// };
///
/// # let rt = tokio::runtime::Runtime::new().unwrap();
/// # rt.block_on(async {
/// let clock = ManualClock::new(1_700_000_000);
/// let limiter = RateLimiter::new(
///     RateLimiterOptions {
///         namespace: EventNamespace::try_from("ipRateLimit").unwrap(),
///         tiers: TierSet::Ar1(vec![DecayTier {
///             max_occurrences: MaxOccurrences::try_from(1.2).unwrap(),
///             decay_factor: DecayFactor::try_from(2.0).unwrap(),
///             duration_resolution: DurationResolution::default(),
///         }]),
///     },
///     MemoryStore::new(),
/// )
/// .unwrap()
/// .with_clock(clock.clone());
///
/// limiter.register().await.unwrap();
///
/// assert_eq!(limiter.check("1.1.1.1", 1).await.unwrap(), RateLimitDecision::Allowed);
///
/// let RateLimitDecision::Rejected { retry_after_seconds: Some(wait) } =
///     limiter.check("1.1.1.1", 1).await.unwrap()
/// else {
///     panic!("second event should be rejected");
/// };
///
/// clock.advance(wait);
/// assert!(limiter.check("1.1.1.1", 1).await.unwrap().is_allowed());
/// # });
/// ```
pub struct RateLimiter<S, C = SystemClock> {
    store: S,
    clock: C,
    namespace: EventNamespace,
    tiers: TierSet,
    serialized_tiers: Arc<str>,
    routine: Routine,
}

impl<S: ScriptStore> RateLimiter<S, SystemClock> {
    /// Create a limiter over `store` using the wall clock.
    ///
    /// Does not touch the store; call [`RateLimiter::register`] before serving traffic.
    /// Fails with [`TierLimitError::InvalidTier`] when `options.tiers` is empty.
    pub fn new(options: RateLimiterOptions, store: S) -> Result<Self, TierLimitError> {
        let serialized_tiers = options.tiers.to_routine_json()?;
        let routine = Routine::new(options.tiers.algorithm().routine_source());

        Ok(Self {
            store,
            clock: SystemClock,
            namespace: options.namespace,
            tiers: options.tiers,
            serialized_tiers: Arc::from(serialized_tiers),
            routine,
        })
    } // end constructor
}

impl<S: ScriptStore, C: Clock> RateLimiter<S, C> {
    /// Replace the time source.
    ///
    /// Every limiter sharing a store should agree on time; a skewed clock shifts buckets
    /// and decay for everyone.
    pub fn with_clock<T: Clock>(self, clock: T) -> RateLimiter<S, T> {
        RateLimiter {
            store: self.store,
            clock,
            namespace: self.namespace,
            tiers: self.tiers,
            serialized_tiers: self.serialized_tiers,
            routine: self.routine,
        }
    }

    /// Namespace of this limiter.
    pub fn namespace(&self) -> &EventNamespace {
        &self.namespace
    }

    /// Configured tiers.
    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    /// Algorithm the store runs for this limiter.
    pub fn algorithm(&self) -> Algorithm {
        self.tiers.algorithm()
    }

    /// The routine this limiter invokes.
    pub fn routine(&self) -> &Routine {
        &self.routine
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Install the routine in the store.
    ///
    /// Should complete before the first call; a limiter that skips it still works, paying
    /// one failed invocation to learn the routine is missing. Safe to repeat.
    ///
    /// # Errors
    ///
    /// [`TierLimitError::RegistrationMismatch`] if the store's fingerprint differs from the
    /// local one. This is fatal and should not be retried.
    pub async fn register(&self) -> Result<(), TierLimitError> {
        self.routine.register(&self.store).await
    }

    /// Add `count` occurrences for `key` unless that would exceed any tier.
    ///
    /// Returns `0` when the occurrences were admitted and recorded in every tier. Otherwise
    /// nothing is recorded and the result is `1`, or, with `want_wait_time`, the number of
    /// seconds until the same `count` would be admitted
    /// ([`UNBOUNDED_WAIT_SECONDS`](crate::UNBOUNDED_WAIT_SECONDS) if never).
    ///
    /// A `count` of `0` probes the key without recording anything.
    ///
    /// # Errors
    ///
    /// - [`TierLimitError::InvalidArgument`] if `count` is negative; the store is not called.
    /// - [`TierLimitError::RoutineNotFoundAfterReload`] if the routine stayed missing after
    ///   one re-registration.
    /// - Any store failure, unchanged.
    pub async fn is_exceeded(
        &self,
        key: &str,
        count: i64,
        want_wait_time: bool,
    ) -> Result<u64, TierLimitError> {
        if count < 0 {
            return Err(TierLimitError::InvalidArgument(
                "count has to be non-negative".to_string(),
            ));
        }

        let result = self
            .invoke(Invocation {
                key,
                delta: count,
                namespace: &self.namespace,
                serialized_tiers: &self.serialized_tiers,
                timestamp_seconds: self.clock.now_seconds(),
                want_wait_time,
            })
            .await?;

        u64::try_from(result).map_err(|_| {
            TierLimitError::StoreError(format!("routine returned a negative result: {result}"))
        })
    } // end method is_exceeded

    /// Add `count` occurrences for `key` and report the outcome with a wait estimate.
    pub async fn check(&self, key: &str, count: u64) -> Result<RateLimitDecision, TierLimitError> {
        let count = i64::try_from(count).map_err(|_| {
            TierLimitError::InvalidArgument(format!("count {count} is too large"))
        })?;

        let result = self.is_exceeded(key, count, true).await?;

        Ok(RateLimitDecision::from_wait_time(result))
    } // end method check

    /// Clear every tier's state for `key`.
    pub async fn reset(&self, key: &str) -> Result<(), TierLimitError> {
        self.invoke(Invocation {
            key,
            delta: Invocation::RESET,
            namespace: &self.namespace,
            serialized_tiers: &self.serialized_tiers,
            timestamp_seconds: 0,
            want_wait_time: false,
        })
        .await?;

        Ok(())
    } // end method reset

    async fn invoke(&self, invocation: Invocation<'_>) -> Result<i64, TierLimitError> {
        protocol::invoke(&self.store, &self.routine, &invocation).await
    }
}
