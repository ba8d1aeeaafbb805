use crate::config::CacheConfig;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    Connection(String),

    #[error("Cache command failed: {0}")]
    Command(#[from] RedisError),

    #[error("Cache operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Cached value is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Key/value store holding serialized responses
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError>;
}

/// Shared values keyed by destination, each built at most once
pub struct Pools<T> {
    pools: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for Pools<T> {
    fn default() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> Pools<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, running `init` only if no value exists yet.
    ///
    /// Concurrent first callers wait on the same initialization. A failed
    /// initialization leaves the slot empty so the next caller retries.
    pub async fn get_or_try_init<E, F, Fut>(&self, key: &str, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = {
            let mut pools = self.pools.lock().await;
            pools.entry(key.to_string()).or_default().clone()
        };
        cell.get_or_try_init(init).await.cloned()
    }

    pub async fn len(&self) -> usize {
        let pools = self.pools.lock().await;
        pools.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn timed<T, E>(timeout: Duration, call: impl Future<Output = Result<T, E>>) -> Result<T, CacheError>
where
    CacheError: From<E>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(CacheError::from),
        Err(_) => Err(CacheError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Redis-backed [`CacheStore`].
///
/// Connections are `ConnectionManager`s shared per destination through a
/// [`Pools`] registry, so stores pointing at the same server reuse one
/// multiplexed connection.
#[derive(Clone)]
pub struct RedisCacheStore {
    config: CacheConfig,
    pools: Arc<Pools<ConnectionManager>>,
}

impl RedisCacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_pools(config, Arc::new(Pools::new()))
    }

    pub fn with_pools(config: CacheConfig, pools: Arc<Pools<ConnectionManager>>) -> Self {
        Self { config, pools }
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let destination = self.config.destination();
        self.pools
            .get_or_try_init(&destination, || async {
                debug!("Connecting to Redis at {} ({})", self.config.url(), destination);

                let client = redis::Client::open(self.config.url()).map_err(|e| {
                    error!("Failed to create Redis client: {}", e);
                    CacheError::Connection(format!("Failed to create Redis client: {}", e))
                })?;

                timed(self.config.timeout(), ConnectionManager::new(client))
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to Redis: {}", e);
                        CacheError::Connection(format!(
                            "Failed to connect to Redis at {}: {}",
                            destination, e
                        ))
                    })
            })
            .await
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        timed(self.config.timeout(), conn.get::<_, Option<String>>(key)).await
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        timed(self.config.timeout(), conn.set_ex::<_, _, ()>(key, value, ttl_secs)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_first_access_builds_once() {
        let pools: Arc<Pools<usize>> = Arc::new(Pools::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pools = pools.clone();
            let builds = builds.clone();
            tasks.push(tokio::spawn(async move {
                pools
                    .get_or_try_init("cache:6379", || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, CacheError>(builds.fetch_add(1, Ordering::SeqCst) + 1)
                    })
                    .await
                    .unwrap()
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), 1);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(pools.len().await, 1);
    }

    #[tokio::test]
    async fn test_destinations_are_separate() {
        let pools: Pools<String> = Pools::new();
        let a = pools
            .get_or_try_init("a:6379", || async { Ok::<_, CacheError>("a".to_string()) })
            .await
            .unwrap();
        let b = pools
            .get_or_try_init("b:6379", || async { Ok::<_, CacheError>("b".to_string()) })
            .await
            .unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("a", "b"));
        assert_eq!(pools.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_initialization_is_retried() {
        let pools: Pools<u32> = Pools::new();
        let failed = pools
            .get_or_try_init("down:6379", || async {
                Err(CacheError::Connection("refused".into()))
            })
            .await;
        assert!(failed.is_err());
        assert!(pools.is_empty().await);

        let value = pools
            .get_or_try_init("down:6379", || async { Ok::<_, CacheError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
