/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum TierLimitError {
    /// Redis error.
    #[error("redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failure reported by a non-Redis store while running a routine.
    #[error("store error: {0}")]
    StoreError(String),

    /// Caller passed an argument the limiter never accepts (e.g. a negative count).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A tier or tier list failed validation.
    #[error("invalid tier: {0}")]
    InvalidTier(String),

    /// The event namespace failed validation.
    #[error("invalid event namespace: {0}")]
    InvalidEventNamespace(String),

    /// The store has no routine registered under this fingerprint.
    ///
    /// Recovered once by re-registering; see [`TierLimitError::RoutineNotFoundAfterReload`].
    #[error("routine not found in store: {0}")]
    RoutineNotFound(String),

    /// The routine was still missing after re-registration. Never retried.
    #[error("routine still not found after re-registration: {0}")]
    RoutineNotFoundAfterReload(String),

    /// The store registered the routine under a different fingerprint than the one
    /// computed locally. Never retried.
    #[error("store returned unexpected fingerprint: {actual} vs {expected}")]
    RegistrationMismatch {
        /// Locally computed fingerprint.
        expected: String,
        /// Fingerprint returned by the store.
        actual: String,
    },

    /// Tier list could not be serialized or parsed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
