#![cfg(any(feature = "redis-tokio", feature = "redis-smol"))]

use std::{env, future::Future, sync::Arc};

use tierlimit::{
    Clock, DecayFactor, DecayTier, DurationResolution, EventNamespace, LimitDuration,
    ManualClock, MaxOccurrences, RateLimitDecision, RateLimiter, RateLimiterOptions,
    RedisStore, SystemClock, TierLimitError, TierSet, UNBOUNDED_WAIT_SECONDS, WindowTier,
};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_namespace() -> EventNamespace {
    let n: u64 = rand::random();
    EventNamespace::try_from(format!("tierlimit_test_{n}")).unwrap()
}

fn run<F: Future<Output = ()>>(f: impl FnOnce(String) -> F) {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(f(url));
}

fn decay_tier(max_occurrences: f64, decay_factor: f64, resolution: f64) -> DecayTier {
    DecayTier {
        max_occurrences: MaxOccurrences::try_from(max_occurrences).unwrap(),
        decay_factor: DecayFactor::try_from(decay_factor).unwrap(),
        duration_resolution: DurationResolution::try_from(resolution).unwrap(),
    }
}

fn window_tier(max_occurrences: f64, limit_duration: f64, resolution: f64) -> WindowTier {
    WindowTier {
        max_occurrences: MaxOccurrences::try_from(max_occurrences).unwrap(),
        limit_duration: LimitDuration::try_from(limit_duration).unwrap(),
        duration_resolution: DurationResolution::try_from(resolution).unwrap(),
    }
}

/// A limiter on a fresh namespace whose clock starts at the real current time.
async fn build_rate_limiter(
    url: &str,
    tiers: TierSet,
) -> (RateLimiter<RedisStore, ManualClock>, ManualClock) {
    let client = redis::Client::open(url).unwrap();
    let store = RedisStore::default_from_client(client).await.unwrap();
    let clock = ManualClock::new(SystemClock.now_seconds());

    let limiter = RateLimiter::new(
        RateLimiterOptions {
            namespace: unique_namespace(),
            tiers,
        },
        store,
    )
    .unwrap()
    .with_clock(clock.clone());

    limiter.register().await.unwrap();

    (limiter, clock)
}

async fn connection(url: &str) -> redis::aio::MultiplexedConnection {
    redis::Client::open(url)
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

async fn tier_key_exists<S, C>(
    conn: &mut redis::aio::MultiplexedConnection,
    limiter: &RateLimiter<S, C>,
    key: &str,
    index: usize,
) -> bool
where
    S: tierlimit::ScriptStore,
    C: Clock,
{
    let tier_key = limiter.algorithm().tier_key(limiter.namespace(), key, index);
    let exists: i64 = redis::cmd("EXISTS")
        .arg(tier_key)
        .query_async(conn)
        .await
        .unwrap();

    exists == 1
}

#[test]
fn ar1_admits_max_then_reports_sufficient_wait() {
    run(|url| async move {
        let (limiter, clock) =
            build_rate_limiter(&url, TierSet::Ar1(vec![decay_tier(1.2, 2.0, 1.0)])).await;

        assert_eq!(limiter.is_exceeded("1.1.1.1", 1, true).await.unwrap(), 0);

        let wait = limiter.is_exceeded("1.1.1.1", 1, true).await.unwrap();
        assert_eq!(wait, 3);

        clock.advance(wait - 1);
        assert_ne!(limiter.is_exceeded("1.1.1.1", 1, true).await.unwrap(), 0);

        clock.advance(1);
        assert_eq!(limiter.is_exceeded("1.1.1.1", 1, true).await.unwrap(), 0);
    });
}

#[test]
fn ar1_rejected_increment_commits_to_no_tier() {
    run(|url| async move {
        let (limiter, clock) = build_rate_limiter(
            &url,
            TierSet::Ar1(vec![decay_tier(5.0, 1.0, 1.0), decay_tier(3.0, 2.0, 1.0)]),
        )
        .await;

        assert_eq!(limiter.is_exceeded("k", 3, false).await.unwrap(), 0);
        for _ in 0..5 {
            assert_ne!(limiter.is_exceeded("k", 1, false).await.unwrap(), 0);
        }

        clock.advance(60);
        assert_eq!(limiter.is_exceeded("k", 2, false).await.unwrap(), 0);
        assert_ne!(limiter.is_exceeded("k", 1, false).await.unwrap(), 0);

        assert_eq!(
            limiter.is_exceeded("k", 6, true).await.unwrap(),
            UNBOUNDED_WAIT_SECONDS
        );
    });
}

#[test]
fn sliding_window_long_tier_wait() {
    run(|url| async move {
        let (limiter, clock) = build_rate_limiter(
            &url,
            TierSet::SlidingWindow(vec![
                window_tier(1.0, 5.0, 1.0),
                window_tier(5.0, 3600.0, 1.0),
            ]),
        )
        .await;
        let start = clock.now_seconds();

        for i in 0..5 {
            clock.set(start + i * 5);
            assert_eq!(limiter.is_exceeded("1.1.1.1", 1, true).await.unwrap(), 0);
        }

        clock.set(start + 25);
        assert_eq!(limiter.is_exceeded("1.1.1.1", 1, true).await.unwrap(), 3575);

        clock.set(start + 3600);
        assert_eq!(
            limiter.check("1.1.1.1", 1).await.unwrap(),
            RateLimitDecision::Allowed
        );
    });
}

#[test]
fn state_lives_under_hash_tagged_tier_keys() {
    run(|url| async move {
        let mut conn = connection(&url).await;
        let (limiter, _clock) = build_rate_limiter(
            &url,
            TierSet::SlidingWindow(vec![window_tier(1.0, 5.0, 1.0), window_tier(5.0, 60.0, 1.0)]),
        )
        .await;

        // A pure probe writes nothing.
        assert_eq!(limiter.is_exceeded("user", 0, false).await.unwrap(), 0);
        assert!(!tier_key_exists(&mut conn, &limiter, "user", 0).await);

        assert_eq!(limiter.is_exceeded("user", 1, false).await.unwrap(), 0);
        assert!(tier_key_exists(&mut conn, &limiter, "user", 0).await);
        assert!(tier_key_exists(&mut conn, &limiter, "user", 1).await);

        let ttl: i64 = redis::cmd("TTL")
            .arg(limiter.algorithm().tier_key(limiter.namespace(), "user", 1))
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(ttl > 0 && ttl <= 60, "unexpected ttl {ttl}");

        limiter.reset("user").await.unwrap();
        assert!(!tier_key_exists(&mut conn, &limiter, "user", 0).await);
        assert!(!tier_key_exists(&mut conn, &limiter, "user", 1).await);

        assert_eq!(limiter.is_exceeded("user", 1, false).await.unwrap(), 0);
    });
}

#[test]
fn recovers_after_script_flush() {
    run(|url| async move {
        let mut conn = connection(&url).await;
        let (limiter, _clock) =
            build_rate_limiter(&url, TierSet::SlidingWindow(vec![window_tier(2.0, 60.0, 1.0)]))
                .await;

        assert_eq!(limiter.is_exceeded("k", 1, false).await.unwrap(), 0);

        let _: () = redis::cmd("SCRIPT")
            .arg("FLUSH")
            .query_async(&mut conn)
            .await
            .unwrap();

        assert_eq!(limiter.is_exceeded("k", 1, false).await.unwrap(), 0);
        assert_ne!(limiter.is_exceeded("k", 1, false).await.unwrap(), 0);

        let loaded: Vec<i64> = redis::cmd("SCRIPT")
            .arg("EXISTS")
            .arg(limiter.routine().fingerprint())
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(loaded, vec![1]);
    });
}

#[test]
fn unregistered_limiter_recovers_on_first_call() {
    run(|url| async move {
        let mut conn = connection(&url).await;
        let _: () = redis::cmd("SCRIPT")
            .arg("FLUSH")
            .query_async(&mut conn)
            .await
            .unwrap();

        let client = redis::Client::open(url.as_str()).unwrap();
        let limiter = RateLimiter::new(
            RateLimiterOptions {
                namespace: unique_namespace(),
                tiers: TierSet::Ar1(vec![decay_tier(1.0, 2.0, 1.0)]),
            },
            RedisStore::from_client(client, 2).await.unwrap(),
        )
        .unwrap();

        assert_eq!(limiter.is_exceeded("k", 1, false).await.unwrap(), 0);
        assert_ne!(limiter.is_exceeded("k", 1, false).await.unwrap(), 0);
    });
}

#[test]
fn zero_connections_is_rejected() {
    run(|url| async move {
        let client = redis::Client::open(url.as_str()).unwrap();

        let err = RedisStore::from_client(client, 0).await.unwrap_err();
        assert!(matches!(err, TierLimitError::InvalidArgument(_)));
    });
}

#[test]
fn concurrent_callers_never_overshoot() {
    run(|url| async move {
        let (limiter, _clock) =
            build_rate_limiter(&url, TierSet::SlidingWindow(vec![window_tier(10.0, 60.0, 1.0)]))
                .await;
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.is_exceeded("hot", 1, false).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() == 0 {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
    });
}

#[test]
fn commit_prunes_thousands_of_stale_buckets_in_every_tier() {
    run(|url| async move {
        let mut conn = connection(&url).await;
        let (limiter, clock) = build_rate_limiter(
            &url,
            TierSet::SlidingWindow(vec![
                window_tier(10.0, 5.0, 1.0),
                window_tier(100_000.0, 86_400.0, 1.0),
            ]),
        )
        .await;
        let now = clock.now_seconds();

        // A busy stretch that has since left the daily window entirely.
        let stale: Vec<(String, u64)> = (0..10_000u64)
            .map(|i| ((now - 86_400 - i).to_string(), 1))
            .collect();
        let daily_key = limiter.algorithm().tier_key(limiter.namespace(), "busy", 1);
        let _: () = redis::cmd("HSET")
            .arg(&daily_key)
            .arg(&stale)
            .query_async(&mut conn)
            .await
            .unwrap();

        assert_eq!(limiter.is_exceeded("busy", 1, false).await.unwrap(), 0);

        for index in 0..2 {
            let tier_key = limiter.algorithm().tier_key(limiter.namespace(), "busy", index);
            let fields: i64 = redis::cmd("HLEN")
                .arg(tier_key)
                .query_async(&mut conn)
                .await
                .unwrap();
            assert_eq!(fields, 1, "tier {index} should hold only the new bucket");
        }

        limiter.reset("busy").await.unwrap();
    });
}
