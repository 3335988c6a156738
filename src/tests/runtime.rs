use std::future::Future;

use crate::{
    DecayFactor, DecayTier, DurationResolution, EventNamespace, LimitDuration, ManualClock,
    MaxOccurrences, MemoryStore, RateLimiter, RateLimiterOptions, TierSet, WindowTier,
};

pub(super) fn block_on<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::runtime::Runtime::new().unwrap().block_on(f)
}

pub(super) fn decay_tier(max_occurrences: f64, decay_factor: f64, resolution: f64) -> DecayTier {
    DecayTier {
        max_occurrences: MaxOccurrences::try_from(max_occurrences).unwrap(),
        decay_factor: DecayFactor::try_from(decay_factor).unwrap(),
        duration_resolution: DurationResolution::try_from(resolution).unwrap(),
    }
}

pub(super) fn window_tier(
    max_occurrences: f64,
    limit_duration: f64,
    resolution: f64,
) -> WindowTier {
    WindowTier {
        max_occurrences: MaxOccurrences::try_from(max_occurrences).unwrap(),
        limit_duration: LimitDuration::try_from(limit_duration).unwrap(),
        duration_resolution: DurationResolution::try_from(resolution).unwrap(),
    }
}

/// A registered limiter over a fresh [`MemoryStore`], driven by a [`ManualClock`] at `start`.
pub(super) async fn memory_limiter(
    tiers: TierSet,
    start: u64,
) -> (RateLimiter<MemoryStore, ManualClock>, ManualClock) {
    let clock = ManualClock::new(start);

    let limiter = RateLimiter::new(
        RateLimiterOptions {
            namespace: EventNamespace::try_from("test").unwrap(),
            tiers,
        },
        MemoryStore::new(),
    )
    .unwrap()
    .with_clock(clock.clone());

    limiter.register().await.unwrap();

    (limiter, clock)
}
