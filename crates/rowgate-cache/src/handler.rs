use crate::config::CacheConfig;
use crate::key::cache_key;
use crate::store::{CacheError, CacheStore, RedisCacheStore};
use async_trait::async_trait;
use http::{Method, StatusCode};
use rowgate_chain::{Chain, Handler, Request, Response};
use rowgate_query::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-through response cache for top-level GETs.
///
/// A hit answers the request and cancels the rest of the chain. A miss
/// lets the chain run and stores the body of a `200 OK`. Store failures
/// are logged and never change the response.
pub struct CacheHandler {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl CacheHandler {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Handler backed by Redis at the configured destination
    pub fn redis(config: CacheConfig) -> Self {
        Self::new(Arc::new(RedisCacheStore::new(config.clone())), config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    async fn lookup(&self, key: &str) -> std::result::Result<Option<Value>, CacheError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, body: &Value) -> std::result::Result<(), CacheError> {
        let raw = serde_json::to_string(body)?;
        self.store.set_ex(key, raw, self.config.ttl_secs).await
    }
}

#[async_trait]
impl Handler for CacheHandler {
    fn name(&self) -> &str {
        "cache"
    }

    async fn handle(&self, chain: &mut Chain<'_>, req: &mut Request, res: &mut Response) -> Result<()> {
        if req.method != Method::GET || chain.is_nested() {
            return Ok(());
        }

        // Stripped before keying so it never reaches the query either
        if req.remove_param(&self.config.bypass_param).is_some() {
            debug!("Cache bypassed for {}", req);
            return Ok(());
        }

        let key = cache_key(req);
        match self.lookup(&key).await {
            Ok(Some(body)) => {
                debug!("Cache hit: {}", key);
                res.status = StatusCode::OK;
                res.body = Some(body);
                chain.cancel();
                return Ok(());
            }
            Ok(None) => debug!("Cache miss: {}", key),
            Err(e) => warn!("Failed to read cache key '{}': {}", key, e),
        }

        chain.go(req, res).await?;

        if res.status == StatusCode::OK {
            if let Some(body) = &res.body {
                if let Err(e) = self.save(&key, body).await {
                    warn!("Failed to save cache key '{}': {}", key, e);
                }
            }
        }
        Ok(())
    }
}
