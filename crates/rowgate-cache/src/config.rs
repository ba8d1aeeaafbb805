use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 180 days
pub const DEFAULT_TTL_SECS: u64 = 15_552_000;
pub const DEFAULT_BYPASS_PARAM: &str = "nocache";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    /// Name of the shared connection; defaults to `host:port`
    pub pool_key: Option<String>,
    pub ttl_secs: u64,
    /// Query parameter that skips the cache for one request
    pub bypass_param: String,
    /// Applied to connecting and to every get/set
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            pool_key: None,
            ttl_secs: DEFAULT_TTL_SECS,
            bypass_param: DEFAULT_BYPASS_PARAM.to_string(),
            timeout_ms: 2500,
        }
    }
}

impl CacheConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_pool_key(mut self, pool_key: impl Into<String>) -> Self {
        self.pool_key = Some(pool_key.into());
        self
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_bypass_param(mut self, param: impl Into<String>) -> Self {
        self.bypass_param = param.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Key under which connections to this destination are shared
    pub fn destination(&self) -> String {
        self.pool_key
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{"host": "cache.internal"}"#).unwrap();
        assert_eq!(config.port, 6379);
        assert_eq!(config.ttl_secs, 15_552_000);
        assert_eq!(config.bypass_param, "nocache");
        assert_eq!(config.destination(), "cache.internal:6379");
        assert_eq!(config.url(), "redis://cache.internal:6379/");
    }

    #[test]
    fn test_pool_key_names_the_destination() {
        let config = CacheConfig::new("10.0.0.5", 6380).with_pool_key("primary");
        assert_eq!(config.destination(), "primary");
    }
}
