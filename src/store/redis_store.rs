use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use redis::{Client, RedisError, aio::ConnectionManager};

use crate::{Invocation, ScriptStore, TierLimitError};

/// Redis-backed [`ScriptStore`] over one or more [`redis::aio::ConnectionManager`]s.
///
/// Routines are installed with `SCRIPT LOAD` and executed with `EVALSHA`. Calls rotate
/// across the managers round-robin.
///
/// All managers are expected to reach the same Redis endpoint. A Redis Cluster needs the
/// routine loaded on every primary, which this store does not do.
#[derive(Debug)]
pub struct RedisStore {
    connection_managers: Arc<Vec<ConnectionManager>>,
    track_index: AtomicUsize,
}

impl RedisStore {
    /// Create a new [`RedisStore`] with a single connection manager.
    pub async fn default_from_client(client: Client) -> Result<Self, TierLimitError> {
        Self::from_client(client, 1).await
    }

    /// Create a new [`RedisStore`] with `connection_count` connection managers.
    pub async fn from_client(
        client: Client,
        connection_count: usize,
    ) -> Result<Self, TierLimitError> {
        if connection_count == 0 {
            return Err(TierLimitError::InvalidArgument(
                "connection count must be > 0".to_string(),
            ));
        }

        let mut connection_managers = Vec::with_capacity(connection_count);

        for _ in 0..connection_count {
            connection_managers.push(client.get_connection_manager().await?);
        }

        Ok(Self {
            connection_managers: Arc::new(connection_managers),
            track_index: AtomicUsize::new(0),
        })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection_manager(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_managers: Arc::new(vec![connection_manager]),
            track_index: AtomicUsize::new(0),
        }
    }

    fn get(&self) -> ConnectionManager {
        let index = self.track_index.fetch_add(1, Ordering::Relaxed);
        self.connection_managers[index % self.connection_managers.len()].clone()
    } // end method get
} // end impl RedisStore

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            connection_managers: self.connection_managers.clone(),
            track_index: AtomicUsize::new(0),
        }
    }
}

#[inline]
fn is_no_script(err: &RedisError) -> bool {
    err.kind() == redis::ErrorKind::Server(redis::ServerErrorKind::NoScript)
}

#[async_trait]
impl ScriptStore for RedisStore {
    async fn load_script(&self, source: &str) -> Result<String, TierLimitError> {
        let mut connection_manager = self.get();

        let fingerprint: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut connection_manager)
            .await?;

        Ok(fingerprint)
    }

    async fn eval_sha(
        &self,
        fingerprint: &str,
        invocation: &Invocation<'_>,
    ) -> Result<i64, TierLimitError> {
        let mut connection_manager = self.get();

        let result: Result<i64, RedisError> = redis::cmd("EVALSHA")
            .arg(fingerprint)
            .arg(1)
            .arg(invocation.key)
            .arg(invocation.delta)
            .arg(invocation.namespace)
            .arg(invocation.serialized_tiers)
            .arg(invocation.timestamp_seconds)
            .arg(u8::from(invocation.want_wait_time))
            .query_async(&mut connection_manager)
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(err) if is_no_script(&err) => {
                Err(TierLimitError::RoutineNotFound(fingerprint.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
