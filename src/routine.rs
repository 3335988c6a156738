use std::sync::Arc;

use crate::{ScriptStore, TierLimitError};

/// A routine's source text paired with its fingerprint (lowercase hex SHA1).
///
/// The fingerprint is computed once, here, and is the only name the limiter ever uses to
/// invoke the routine.
#[derive(Debug, Clone)]
pub struct Routine {
    source: &'static str,
    fingerprint: Arc<str>,
}

impl Routine {
    pub(crate) fn new(source: &'static str) -> Self {
        let fingerprint = redis::Script::new(source).get_hash().to_ascii_lowercase();

        Self {
            source,
            fingerprint: Arc::from(fingerprint),
        }
    }

    /// Source text submitted to the store.
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Locally computed fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Install the routine in `store` and verify the store agrees on its fingerprint.
    ///
    /// Safe to call any number of times. A mismatch means the store hashes routines
    /// differently than this client expects and is never retried.
    pub(crate) async fn register<S: ScriptStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<(), TierLimitError> {
        let store_fingerprint = store.load_script(self.source).await?;

        if *store_fingerprint != *self.fingerprint {
            tracing::error!(
                expected = %self.fingerprint,
                actual = %store_fingerprint,
                "routine.register.mismatch, store returned unexpected fingerprint"
            );

            return Err(TierLimitError::RegistrationMismatch {
                expected: self.fingerprint.to_string(),
                actual: store_fingerprint,
            });
        }

        tracing::debug!(fingerprint = %self.fingerprint, "routine.register, routine loaded");

        Ok(())
    } // end method register
}
