//! Tier configuration for both algorithms.
//!
//! A limiter owns an ordered list of tiers. Every tier is evaluated on each call and the
//! limit is exceeded when any single tier is exceeded. Order matters only in that it is the
//! order tiers are serialized to (and stored by) the routine.

use serde::{Deserialize, Serialize};

use crate::{
    DecayFactor, DurationResolution, LimitDuration, MaxOccurrences, TierLimitError,
    algorithm::Algorithm,
};

/// One AR1 tier: an exponentially decaying accumulator.
///
/// # Examples
///
/// ```
/// use tierlimit::{DecayFactor, DecayTier, DurationResolution, MaxOccurrences};
///
/// // Roughly one event per second, halving the accumulated value every second.
/// let tier = DecayTier {
///     max_occurrences: MaxOccurrences::try_from(1.2).unwrap(),
///     decay_factor: DecayFactor::try_from(2.0).unwrap(),
///     duration_resolution: DurationResolution::default(),
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayTier {
    /// Threshold the decayed value plus the new count must not exceed.
    pub max_occurrences: MaxOccurrences,
    /// Decay base per resolution unit.
    pub decay_factor: DecayFactor,
    /// Length of one resolution unit in seconds.
    pub duration_resolution: DurationResolution,
}

/// One sliding-window tier: bucketed counts over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowTier {
    /// Maximum occurrences within `limit_duration`.
    pub max_occurrences: MaxOccurrences,
    /// Window length in seconds.
    pub limit_duration: LimitDuration,
    /// Bucket width in seconds.
    pub duration_resolution: DurationResolution,
}

/// The tier list of a limiter, tagged by the algorithm that evaluates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", content = "tiers", rename_all = "snake_case")]
pub enum TierSet {
    /// Tiers evaluated by the AR1 decay routine.
    Ar1(Vec<DecayTier>),
    /// Tiers evaluated by the sliding-window routine.
    SlidingWindow(Vec<WindowTier>),
}

impl TierSet {
    pub(crate) fn algorithm(&self) -> Algorithm {
        match self {
            Self::Ar1(_) => Algorithm::Ar1,
            Self::SlidingWindow(_) => Algorithm::SlidingWindow,
        }
    }

    /// Number of configured tiers.
    pub fn len(&self) -> usize {
        match self {
            Self::Ar1(tiers) => tiers.len(),
            Self::SlidingWindow(tiers) => tiers.len(),
        }
    }

    /// Whether no tier is configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Triples `[max_occurrences, window_parameter, duration_resolution]` in tier order.
    pub(crate) fn triples(&self) -> Vec<[f64; 3]> {
        match self {
            Self::Ar1(tiers) => tiers
                .iter()
                .map(|tier| {
                    [
                        *tier.max_occurrences,
                        *tier.decay_factor,
                        *tier.duration_resolution,
                    ]
                })
                .collect(),
            Self::SlidingWindow(tiers) => tiers
                .iter()
                .map(|tier| {
                    [
                        *tier.max_occurrences,
                        *tier.limit_duration,
                        *tier.duration_resolution,
                    ]
                })
                .collect(),
        }
    }

    /// Encode the tiers the way the routine expects them: a JSON array of triples.
    pub(crate) fn to_routine_json(&self) -> Result<String, TierLimitError> {
        if self.is_empty() {
            return Err(TierLimitError::InvalidTier(
                "At least one tier is required".to_string(),
            ));
        }

        Ok(serde_json::to_string(&self.triples())?)
    }
}

/// Decode a serialized tier list. Used by stores that evaluate routines natively.
pub(crate) fn parse_serialized_tiers(serialized: &str) -> Result<Vec<[f64; 3]>, TierLimitError> {
    let tiers: Vec<[f64; 3]> = serde_json::from_str(serialized)?;

    for tier in &tiers {
        if tier.iter().any(|value| !value.is_finite() || *value <= 0f64) {
            return Err(TierLimitError::StoreError(format!(
                "malformed tier {tier:?}: all values must be greater than 0"
            )));
        }
    }

    Ok(tiers)
}
