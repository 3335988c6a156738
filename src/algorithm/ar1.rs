use crate::{
    UNBOUNDED_WAIT_SECONDS,
    algorithm::{MAX_EXPIRE_SECONDS, TOLERANCE},
};

/// Decayed values below this are treated as gone when computing the key expiry.
const MIN_RETAINED_VALUE: f64 = 0.001;

pub(crate) const AR1_LUA: &str = r#"
    local key = KEYS[1]

    local delta = tonumber(ARGV[1])
    local namespace = ARGV[2]
    local tiers = cjson.decode(ARGV[3])
    local now = tonumber(ARGV[4])
    local want_wait_time = tonumber(ARGV[5]) == 1

    local key_prefix = namespace .. ":{" .. key .. "}:ar1:"

    -- reset
    if delta < 0 then
        for i = 1, #tiers do
            redis.call("DEL", key_prefix .. i)
        end

        return 0
    end

    local tolerance = 1e-9
    local unbounded_wait = 2147483647
    local min_retained_value = 0.001
    local max_expire = 2147483647

    local decayed = {}
    local existed = {}
    local exceeded = false
    local wait_time = 0

    for i = 1, #tiers do
        local max_occurrences = tiers[i][1]
        local decay_factor = tiers[i][2]
        local resolution = tiers[i][3]

        local state = redis.call("HMGET", key_prefix .. i, "t", "v")
        local last = tonumber(state[1])
        local value = tonumber(state[2])

        if last and value then
            existed[i] = true
            value = value * math.pow(decay_factor, -math.max(0, now - last) / resolution)
        else
            existed[i] = false
            value = 0
        end

        decayed[i] = value

        if value + delta > max_occurrences + tolerance then
            exceeded = true

            if want_wait_time then
                local tier_wait = unbounded_wait
                local headroom = max_occurrences - delta

                if headroom > 0 and decay_factor > 1 then
                    tier_wait = math.ceil(resolution * math.log(value / headroom) / math.log(decay_factor))
                    tier_wait = math.min(math.max(tier_wait, 1), unbounded_wait)
                end

                wait_time = math.max(wait_time, tier_wait)
            end
        end
    end

    -- all-or-nothing: an exceeded tier blocks the commit everywhere
    if exceeded then
        if want_wait_time then
            return wait_time
        end

        return 1
    end

    for i = 1, #tiers do
        if delta > 0 or existed[i] then
            local tier_key = key_prefix .. i
            local decay_factor = tiers[i][2]
            local value = decayed[i] + delta

            redis.call("HSET", tier_key, "t", now, "v", value)

            if decay_factor > 1 then
                local ttl = 1
                if value > min_retained_value then
                    ttl = math.ceil(tiers[i][3] * math.log(value / min_retained_value) / math.log(decay_factor)) + 1
                end

                redis.call("EXPIRE", tier_key, math.min(ttl, max_expire))
            else
                redis.call("PERSIST", tier_key)
            end
        end
    end

    return 0
"#;

/// State of one AR1 tier for one key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DecayCounter {
    pub last_event_seconds: u64,
    pub value: f64,
    pub expires_at: Option<u64>,
}

/// Native equivalent of [`AR1_LUA`] for a non-negative `delta`.
///
/// `counters` holds one slot per tier, `None` where the tier has no state.
pub(crate) fn evaluate(
    counters: &mut [Option<DecayCounter>],
    tiers: &[[f64; 3]],
    delta: u64,
    now: u64,
    want_wait_time: bool,
) -> u64 {
    let delta_value = delta as f64;
    let mut decayed = Vec::with_capacity(tiers.len());
    let mut exceeded = false;
    let mut wait_time = 0u64;

    for (counter, &[max_occurrences, decay_factor, resolution]) in counters.iter().zip(tiers) {
        let value = match counter {
            Some(counter) => {
                let elapsed = now.saturating_sub(counter.last_event_seconds) as f64;
                counter.value * decay_factor.powf(-elapsed / resolution)
            }
            None => 0f64,
        };

        decayed.push(value);

        if value + delta_value > max_occurrences + TOLERANCE {
            exceeded = true;

            if want_wait_time {
                wait_time = wait_time.max(wait_seconds(
                    value,
                    max_occurrences - delta_value,
                    decay_factor,
                    resolution,
                ));
            }
        }
    }

    if exceeded {
        return if want_wait_time { wait_time } else { 1 };
    }

    for ((counter, value), &[_, decay_factor, resolution]) in
        counters.iter_mut().zip(decayed).zip(tiers)
    {
        if delta == 0 && counter.is_none() {
            continue;
        }

        let value = value + delta_value;

        *counter = Some(DecayCounter {
            last_event_seconds: now,
            value,
            expires_at: ttl_seconds(value, decay_factor, resolution)
                .map(|ttl| now.saturating_add(ttl)),
        });
    }

    0
}

/// Smallest whole number of seconds after which `value` has decayed to at most `headroom`.
#[inline]
fn wait_seconds(value: f64, headroom: f64, decay_factor: f64, resolution: f64) -> u64 {
    if headroom <= 0f64 || decay_factor <= 1f64 {
        return UNBOUNDED_WAIT_SECONDS;
    }

    let wait = (resolution * (value / headroom).ln() / decay_factor.ln()).ceil();

    wait.clamp(1f64, UNBOUNDED_WAIT_SECONDS as f64) as u64
}

/// Seconds until `value` decays below [`MIN_RETAINED_VALUE`], at most
/// [`MAX_EXPIRE_SECONDS`]; `None` when it never does.
#[inline]
fn ttl_seconds(value: f64, decay_factor: f64, resolution: f64) -> Option<u64> {
    if decay_factor <= 1f64 {
        return None;
    }

    if value <= MIN_RETAINED_VALUE {
        return Some(1);
    }

    let ttl = (resolution * (value / MIN_RETAINED_VALUE).ln() / decay_factor.ln()).ceil();

    Some((ttl as u64).saturating_add(1).min(MAX_EXPIRE_SECONDS))
}
