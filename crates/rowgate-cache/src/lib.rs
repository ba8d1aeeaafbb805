//! Response caching for the rowgate chain
//!
//! [`CacheHandler`] sits in front of the REST action. Requests are keyed by
//! host, path and sorted query parameters; see [`cache_key`].

mod config;
mod handler;
mod key;
mod store;

pub use config::{CacheConfig, DEFAULT_BYPASS_PARAM, DEFAULT_TTL_SECS};
pub use handler::CacheHandler;
pub use key::cache_key;
pub use store::{CacheError, CacheStore, Pools, RedisCacheStore};
