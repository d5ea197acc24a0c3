use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use thiserror::Error;
use tracing::info;

/// Boxed future returned by [`DistributedTier`] operations.
pub type TierFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TierError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum TierError {
    #[error("distributed tier connection failed: {0}")]
    Connection(String),

    #[error("distributed tier command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for TierError {
    fn from(value: redis::RedisError) -> Self {
        if value.is_connection_dropped() || value.is_connection_refusal() || value.is_timeout() {
            Self::Connection(value.to_string())
        } else {
            Self::Command(value.to_string())
        }
    }
}

/// Shared cache tier reached over the network. Values are opaque bytes;
/// serialization happens in [`TieredCache`](super::TieredCache).
pub trait DistributedTier: Send + Sync {
    fn name(&self) -> &'static str;

    fn get<'a>(&'a self, key: &'a str) -> TierFuture<'a, Option<Vec<u8>>>;

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> TierFuture<'a, ()>;

    fn delete<'a>(&'a self, key: &'a str) -> TierFuture<'a, bool>;

    /// Entry count when the backend can report it cheaply.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Process-local stand-in for a shared tier. Honors TTLs.
#[derive(Debug, Default)]
pub struct InMemoryDistributedTier {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl InMemoryDistributedTier {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, (Vec<u8>, Instant)>) -> R) -> R {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        entries.retain(|_, (_, deadline)| *deadline > now);
        f(&mut entries)
    }
}

impl DistributedTier for InMemoryDistributedTier {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    fn get<'a>(&'a self, key: &'a str) -> TierFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            Ok(self.with_entries(|entries| entries.get(key).map(|(bytes, _)| bytes.clone())))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> TierFuture<'a, ()> {
        Box::pin(async move {
            let deadline = Instant::now() + ttl;
            self.with_entries(|entries| {
                entries.insert(key.to_owned(), (value, deadline));
            });
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> TierFuture<'a, bool> {
        Box::pin(async move { Ok(self.with_entries(|entries| entries.remove(key).is_some())) })
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.with_entries(|entries| entries.len()))
    }
}

/// Redis-backed tier over a multiplexed async connection.
#[derive(Clone)]
pub struct RedisTier {
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTier").finish_non_exhaustive()
    }
}

impl RedisTier {
    pub async fn connect(url: &str) -> Result<Self, TierError> {
        info!("connecting to redis distributed tier");
        let client = Client::open(url).map_err(|e| TierError::Connection(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TierError::Connection(e.to_string()))?;
        info!("redis distributed tier connected");
        Ok(Self { connection })
    }

    pub async fn health_check(&self) -> Result<bool, TierError> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

impl DistributedTier for RedisTier {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get<'a>(&'a self, key: &'a str) -> TierFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let mut conn = self.connection.clone();
            let value: Option<Vec<u8>> = conn.get(key).await?;
            Ok(value)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> TierFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.connection.clone();
            let ttl_secs = ttl.as_secs().max(1);
            let _: () = conn.set_ex(key, value, ttl_secs).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> TierFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.connection.clone();
            let deleted: i64 = conn.del(key).await?;
            Ok(deleted > 0)
        })
    }
}
