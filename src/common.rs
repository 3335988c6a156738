use std::{ops::Deref, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::TierLimitError;

/// Wait time reported when no finite wait can admit the event.
///
/// Returned when the requested count alone is above a tier's `max_occurrences`, or when an
/// AR1 tier has a decay factor `<= 1` and so never shrinks.
pub const UNBOUNDED_WAIT_SECONDS: u64 = 2_147_483_647;

#[inline]
fn positive_finite(value: f64, message: &str) -> Result<f64, TierLimitError> {
    if value.is_finite() && value > 0f64 {
        Ok(value)
    } else {
        Err(TierLimitError::InvalidTier(message.to_string()))
    }
}

/// Maximum number of occurrences a tier admits. May be fractional to allow bursts.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct MaxOccurrences(f64);

impl Deref for MaxOccurrences {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for MaxOccurrences {
    type Error = TierLimitError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        positive_finite(value, "Max occurrences must be greater than 0").map(Self)
    }
}

impl From<MaxOccurrences> for f64 {
    fn from(value: MaxOccurrences) -> Self {
        value.0
    }
}

/// AR1 decay base: factor by which the accumulated value shrinks per resolution unit.
///
/// A factor of `1` disables decay, turning the tier into a hard cumulative cap.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct DecayFactor(f64);

impl Deref for DecayFactor {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for DecayFactor {
    type Error = TierLimitError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        positive_finite(value, "Decay factor must be greater than 0").map(Self)
    }
}

impl From<DecayFactor> for f64 {
    fn from(value: DecayFactor) -> Self {
        value.0
    }
}

/// Sliding window length in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct LimitDuration(f64);

impl Deref for LimitDuration {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for LimitDuration {
    type Error = TierLimitError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        positive_finite(value, "Limit duration must be greater than 0").map(Self)
    }
}

impl From<LimitDuration> for f64 {
    fn from(value: LimitDuration) -> Self {
        value.0
    }
}

/// Time granularity of a tier in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct DurationResolution(f64);

impl Default for DurationResolution {
    /// Returns a resolution of 1 second.
    fn default() -> Self {
        Self(1f64)
    }
}

impl Deref for DurationResolution {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for DurationResolution {
    type Error = TierLimitError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        positive_finite(value, "Duration resolution must be greater than 0").map(Self)
    }
}

impl From<DurationResolution> for f64 {
    fn from(value: DurationResolution) -> Self {
        value.0
    }
}

/// A validated namespace scoping every event key of one limiter.
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventNamespace(Arc<str>);

impl Deref for EventNamespace {
    type Target = Arc<str>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for EventNamespace {
    type Error = TierLimitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(TierLimitError::InvalidEventNamespace(
                "Event namespace must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(TierLimitError::InvalidEventNamespace(
                "Event namespace must not be longer than 255 characters".to_string(),
            ))
        } else if value.contains(':') {
            Err(TierLimitError::InvalidEventNamespace(
                "Event namespace must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for EventNamespace {
    type Error = TierLimitError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<EventNamespace> for String {
    fn from(value: EventNamespace) -> Self {
        value.0.to_string()
    }
}

/// Outcome of [`RateLimiter::check`](crate::RateLimiter::check).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The event was admitted and recorded in every tier.
    Allowed,
    /// The event exceeds at least one tier; nothing was recorded.
    Rejected {
        /// Seconds to wait before the same count would be admitted.
        ///
        /// `None` when no finite wait admits it (see [`UNBOUNDED_WAIT_SECONDS`]).
        retry_after_seconds: Option<u64>,
    },
}

impl RateLimitDecision {
    pub(crate) fn from_wait_time(result: u64) -> Self {
        match result {
            0 => Self::Allowed,
            UNBOUNDED_WAIT_SECONDS => Self::Rejected {
                retry_after_seconds: None,
            },
            seconds => Self::Rejected {
                retry_after_seconds: Some(seconds),
            },
        }
    }

    /// Whether the event was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}
