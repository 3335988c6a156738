#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod rate_limiter;
pub use rate_limiter::*;

mod algorithm;
pub use algorithm::Algorithm;

mod clock;
pub use clock::*;

mod protocol;

mod routine;
pub use routine::*;

mod store;
pub use store::*;

mod tiers;
pub use tiers::{DecayTier, TierSet, WindowTier};

mod error;
pub use error::*;

mod common;
pub use common::{
    DecayFactor, DurationResolution, EventNamespace, LimitDuration, MaxOccurrences,
    RateLimitDecision, UNBOUNDED_WAIT_SECONDS,
};

#[cfg(test)]
mod tests;
