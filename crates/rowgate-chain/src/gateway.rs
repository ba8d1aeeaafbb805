//! Catalog, sources and handlers behind the REST surface

use crate::actions::RestAction;
use crate::chain::{Chain, Handler};
use crate::context::ChainContext;
use crate::request::{Request, Response};
use http::Method;
use rowgate_query::rql::{parse_terms, split_terms};
use rowgate_query::{
    AccessPlan, Catalog, Collection, DataSource, QueryError, Query, Result, SourceRegistry,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 8;

/// Which collections accept deletes without an entity key
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeletePolicy {
    pub allow_batch: bool,
    /// When non-empty, only these collections allow batch deletes
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            allow_batch: true,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

impl DeletePolicy {
    pub fn permits(&self, collection: &str) -> bool {
        let listed = |list: &[String]| list.iter().any(|c| c.eq_ignore_ascii_case(collection));

        self.allow_batch
            && if self.allow.is_empty() {
                !listed(&self.deny)
            } else {
                listed(&self.allow)
            }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Public URL collections live under, e.g. `http://localhost/northwind`
    pub base_url: String,
    pub delete: DeletePolicy,
    pub max_include_depth: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            delete: DeletePolicy::default(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }
}

impl GatewayConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_delete_policy(mut self, delete: DeletePolicy) -> Self {
        self.delete = delete;
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }
}

pub struct Gateway {
    config: GatewayConfig,
    base: Url,
    catalog: Catalog,
    sources: SourceRegistry,
    handlers: Vec<Arc<dyn Handler>>,
    action: Arc<dyn Handler>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, catalog: Catalog, sources: SourceRegistry) -> Result<Self> {
        let trimmed = config.base_url.trim_end_matches('/');
        let base = Url::parse(&format!("{}/", trimmed)).map_err(|e| {
            QueryError::InvalidConfiguration(format!("invalid base_url '{}': {}", config.base_url, e))
        })?;

        Ok(Self {
            config,
            base,
            catalog,
            sources,
            handlers: Vec::new(),
            action: Arc::new(RestAction),
        })
    }

    /// Add a handler that runs before the REST action
    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Handlers for a new chain, REST action last
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers
            .iter()
            .cloned()
            .chain(std::iter::once(Arc::clone(&self.action)))
            .collect()
    }

    /// Resolve a URL, absolute or relative to the base URL, into a request
    pub fn request(&self, method: Method, url: &str, body: Option<Value>) -> Result<Request> {
        let parsed = if url.contains("://") {
            Url::parse(url)
        } else {
            self.base.join(url.trim_start_matches('/'))
        }
        .map_err(|e| QueryError::malformed(format!("invalid url '{}': {}", url, e)))?;

        let base_path = self.base.path().trim_end_matches('/');
        let path = parsed.path();
        let rest = path
            .get(..base_path.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(base_path))
            .map(|_| &path[base_path.len()..])
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(|| QueryError::not_found(format!("'{}' is outside {}", path, self.base)))?;

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let (collection, entity_key) = match segments.as_slice() {
            [collection] => (*collection, None),
            [collection, key] => (*collection, Some(*key)),
            _ => return Err(QueryError::not_found(format!("no collection at '{}'", path))),
        };

        let decode = |s: &str| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .map_err(|e| QueryError::malformed(format!("invalid path segment '{}': {}", s, e)))
        };

        let params = match parsed.query() {
            Some(query) => split_terms(query)?,
            None => Vec::new(),
        };

        Ok(Request {
            method,
            collection: decode(collection)?,
            entity_key: entity_key.map(decode).transpose()?,
            url: parsed,
            params,
            body,
        })
    }

    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.catalog
            .collection(name)
            .ok_or_else(|| QueryError::not_found(format!("collection '{}'", name)))
    }

    pub async fn source_for(&self, collection: &Collection) -> Result<Arc<dyn DataSource>> {
        let backend = collection.backend();
        self.sources.get_source(backend).await.ok_or_else(|| {
            QueryError::BackendUnavailable(format!(
                "backend '{}' for collection '{}' is not registered",
                backend, collection.name
            ))
        })
    }

    /// Parsed query terms plus the entity key predicate
    pub fn query_for(&self, collection: &Collection, req: &Request) -> Result<Query> {
        let query = parse_terms(&req.params)?;
        match &req.entity_key {
            Some(key) => Ok(query.with_predicate(collection.entity.key_predicate(key)?)),
            None => Ok(query),
        }
    }

    pub fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), collection)
    }

    pub fn entity_url(&self, collection: &str, key: &str) -> String {
        format!("{}/{}", self.collection_url(collection), key)
    }

    /// Plan a request without executing it.
    ///
    /// GET yields the select plan, DELETE the key selection that would feed
    /// the delete.
    pub async fn explain(&self, method: Method, url: &str) -> Result<AccessPlan> {
        let req = self.request(method, url, None)?;
        let collection = self.collection(&req.collection)?;
        let source = self.source_for(&collection).await?;
        let query = self.query_for(&collection, &req)?;
        let planner = source.planner();

        let plan = match req.method {
            Method::GET => planner.plan_select(&collection.entity, &query)?,
            Method::DELETE => planner.plan_key_selection(&collection.entity, &query)?,
            ref other => {
                return Err(QueryError::operation_not_supported(format!(
                    "cannot explain {} requests",
                    other
                )))
            }
        };
        debug!("Explained {}: {}", req, plan);
        Ok(plan)
    }

    /// Serve one top-level request
    pub async fn service(&self, method: Method, url: &str, body: Option<Value>) -> Response {
        let start = Instant::now();

        let mut req = match self.request(method, url, body) {
            Ok(req) => req,
            Err(e) => {
                warn!("Rejected request for '{}': {}", url, e);
                return Response::from_error(&e, url);
            }
        };

        let mut res = Response::new();
        let mut context = ChainContext::new();
        let mut chain = Chain::new(self, self.handlers(), &mut context);

        if let Err(e) = chain.run(&mut req, &mut res).await {
            if e.status_code().is_server_error() {
                error!("{} failed: {}", req, e);
            } else {
                debug!("{} rejected: {}", req, e);
            }
            res = Response::from_error(&e, req.path());
        }

        info!(
            "{} -> {} ({}, {} changes) in {}ms",
            req,
            res.status.as_u16(),
            chain.state(),
            res.changes.len(),
            start.elapsed().as_millis()
        );
        res
    }
}
