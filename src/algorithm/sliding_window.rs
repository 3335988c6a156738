use std::collections::BTreeMap;

use crate::{
    UNBOUNDED_WAIT_SECONDS,
    algorithm::{MAX_EXPIRE_SECONDS, TOLERANCE},
};

pub(crate) const SLIDING_WINDOW_LUA: &str = r#"
    local key = KEYS[1]

    local delta = tonumber(ARGV[1])
    local namespace = ARGV[2]
    local tiers = cjson.decode(ARGV[3])
    local now = tonumber(ARGV[4])
    local want_wait_time = tonumber(ARGV[5]) == 1

    local key_prefix = namespace .. ":{" .. key .. "}:sw:"

    -- reset
    if delta < 0 then
        for i = 1, #tiers do
            redis.call("DEL", key_prefix .. i)
        end

        return 0
    end

    local tolerance = 1e-9
    local unbounded_wait = 2147483647
    local max_expire = 2147483647
    local max_counter = 9007199254740991
    local hdel_chunk = 1000

    local expired = {}
    local current = {}
    local ttls = {}
    local exceeded = false
    local wait_time = 0

    for i = 1, #tiers do
        local max_occurrences = math.min(tiers[i][1], max_counter)
        local limit_duration = tiers[i][2]
        local resolution = tiers[i][3]

        local bucket_count = math.max(1, math.ceil(limit_duration / resolution - tolerance))
        local current_bucket = math.floor(now / resolution + tolerance)
        local oldest_bucket = current_bucket - bucket_count + 1

        current[i] = current_bucket
        ttls[i] = math.min(math.max(1, math.ceil(bucket_count * resolution - tolerance)), max_expire)

        local fields = redis.call("HGETALL", key_prefix .. i)
        local in_window = {}
        local stale = {}
        local sum = 0

        for j = 1, #fields, 2 do
            local bucket = tonumber(fields[j])
            local count = tonumber(fields[j + 1]) or 0

            if bucket and bucket >= oldest_bucket then
                sum = sum + count
                in_window[#in_window + 1] = {bucket, count}
            else
                stale[#stale + 1] = fields[j]
            end
        end

        expired[i] = stale

        if sum + delta > max_occurrences then
            exceeded = true

            if want_wait_time then
                local tier_wait = unbounded_wait

                if delta <= max_occurrences then
                    table.sort(in_window, function(a, b) return a[1] < b[1] end)

                    local remaining = sum
                    for j = 1, #in_window do
                        remaining = remaining - in_window[j][2]

                        if remaining + delta <= max_occurrences then
                            local rolls_out_at = (in_window[j][1] + bucket_count) * resolution
                            tier_wait = math.max(1, math.ceil(rolls_out_at - now - tolerance))
                            tier_wait = math.min(tier_wait, unbounded_wait)
                            break
                        end
                    end
                end

                wait_time = math.max(wait_time, tier_wait)
            end
        end
    end

    -- all-or-nothing: an exceeded tier blocks the commit everywhere, and nothing below
    -- may fail once the first tier is written
    if exceeded then
        if want_wait_time then
            return wait_time
        end

        return 1
    end

    if delta > 0 then
        for i = 1, #tiers do
            local tier_key = key_prefix .. i
            local stale = expired[i]

            -- unpack is bounded by the Lua stack, so prune in chunks
            for j = 1, #stale, hdel_chunk do
                redis.call("HDEL", tier_key, unpack(stale, j, math.min(j + hdel_chunk - 1, #stale)))
            end

            redis.call("HINCRBY", tier_key, string.format("%.0f", current[i]), ARGV[1])
            redis.call("EXPIRE", tier_key, ttls[i])
        end
    end

    return 0
"#;

/// State of one sliding-window tier for one key: bucket index to occurrence count.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct BucketCounter {
    pub buckets: BTreeMap<i64, u64>,
    pub expires_at: Option<u64>,
}

/// Largest count a tier tracks; sums stay exact in a Lua number and a Redis integer.
const MAX_COUNTER: f64 = 9_007_199_254_740_991f64;

/// Number of `resolution`-second buckets covering `limit_duration`, at least one.
#[inline]
fn bucket_count(limit_duration: f64, resolution: f64) -> f64 {
    (limit_duration / resolution - TOLERANCE).ceil().max(1f64)
}

/// Index of the bucket `now` falls in.
#[inline]
fn bucket_index(now: u64, resolution: f64) -> i64 {
    (now as f64 / resolution + TOLERANCE).floor() as i64
}

/// Native equivalent of [`SLIDING_WINDOW_LUA`] for a non-negative `delta`.
///
/// `counters` holds one slot per tier, `None` where the tier has no state.
pub(crate) fn evaluate(
    counters: &mut [Option<BucketCounter>],
    tiers: &[[f64; 3]],
    delta: u64,
    now: u64,
    want_wait_time: bool,
) -> u64 {
    let delta_value = delta as f64;
    let mut current_buckets = Vec::with_capacity(tiers.len());
    let mut exceeded = false;
    let mut wait_time = 0u64;

    for (counter, &[max_occurrences, limit_duration, resolution]) in counters.iter().zip(tiers) {
        let max_occurrences = max_occurrences.min(MAX_COUNTER);
        let bucket_count = bucket_count(limit_duration, resolution);
        let current_bucket = bucket_index(now, resolution);
        let oldest_bucket = current_bucket
            .saturating_sub(bucket_count as i64)
            .saturating_add(1);
        current_buckets.push((current_bucket, oldest_bucket));

        let in_window = counter
            .as_ref()
            .map(|counter| counter.buckets.range(oldest_bucket..))
            .into_iter()
            .flatten();

        let sum = in_window
            .clone()
            .fold(0u64, |sum, (_, count)| sum.saturating_add(*count));

        if sum as f64 + delta_value <= max_occurrences {
            continue;
        }

        exceeded = true;

        if !want_wait_time {
            continue;
        }

        let mut tier_wait = UNBOUNDED_WAIT_SECONDS;

        if delta_value <= max_occurrences {
            let mut remaining = sum;

            for (bucket, count) in in_window {
                remaining = remaining.saturating_sub(*count);

                if remaining as f64 + delta_value <= max_occurrences {
                    let rolls_out_at = (*bucket as f64 + bucket_count) * resolution;
                    tier_wait = (rolls_out_at - now as f64 - TOLERANCE)
                        .ceil()
                        .clamp(1f64, UNBOUNDED_WAIT_SECONDS as f64)
                        as u64;
                    break;
                }
            }
        }

        wait_time = wait_time.max(tier_wait);
    }

    if exceeded {
        return if want_wait_time { wait_time } else { 1 };
    }

    if delta == 0 {
        return 0;
    }

    for ((counter, (current_bucket, oldest_bucket)), &[_, limit_duration, resolution]) in
        counters.iter_mut().zip(current_buckets).zip(tiers)
    {
        let counter = counter.get_or_insert_with(BucketCounter::default);
        let ttl = (bucket_count(limit_duration, resolution) * resolution - TOLERANCE)
            .ceil()
            .clamp(1f64, MAX_EXPIRE_SECONDS as f64) as u64;

        counter.buckets = counter.buckets.split_off(&oldest_bucket);
        let count = counter.buckets.entry(current_bucket).or_insert(0);
        *count = count.saturating_add(delta);
        counter.expires_at = Some(now.saturating_add(ttl));
    }

    0
}
