//! Search-index backend for rowgate
//!
//! Collections backed by an Elasticsearch index are read-only. Filters
//! compile into a `bool` query; sort and paging map onto `sort`, `from` and
//! `size`.

mod executor;
mod planner;

pub use executor::ElasticExecutor;
pub use planner::SearchPlanner;

use async_trait::async_trait;
use rowgate_query::{
    AccessPlan, BackendKind, ConnectionConfig, DataSource, DataSourceFactory, DetachedExecutor,
    Executor, Planner, RawResultSet, Result,
};
use std::sync::Arc;
use tracing::debug;

pub struct ElasticSource {
    name: String,
    planner: SearchPlanner,
    executor: Arc<dyn Executor>,
}

impl ElasticSource {
    pub fn new(name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            name: name.into(),
            planner: SearchPlanner::new(),
            executor,
        }
    }
}

#[async_trait]
impl DataSource for ElasticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Elastic
    }

    fn planner(&self) -> &dyn Planner {
        &self.planner
    }

    async fn execute(&self, plan: &AccessPlan) -> Result<RawResultSet> {
        self.executor.execute(plan).await
    }

    async fn close(&self) -> Result<()> {
        self.executor.close().await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ElasticSourceFactory {
    detached: bool,
}

impl ElasticSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detached() -> Self {
        Self { detached: true }
    }
}

#[async_trait]
impl DataSourceFactory for ElasticSourceFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Elastic
    }

    async fn create_source(&self, config: ConnectionConfig) -> Result<Arc<dyn DataSource>> {
        let executor: Arc<dyn Executor> = if self.detached {
            Arc::new(DetachedExecutor::new(&config.name))
        } else {
            Arc::new(ElasticExecutor::connect(&config)?)
        };

        debug!("Created search source '{}'", config.name);
        Ok(Arc::new(ElasticSource::new(config.name, executor)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgate_query::{QueryError, SearchPlan};
    use serde_json::json;

    #[tokio::test]
    async fn test_detached_source_plans_but_does_not_run() {
        let factory = ElasticSourceFactory::detached();
        let config = ConnectionConfig::new("products", BackendKind::Elastic);
        let source = factory.create_source(config).await.unwrap();

        assert_eq!(source.name(), "products");
        assert_eq!(source.planner().kind(), BackendKind::Elastic);

        let plan = AccessPlan::Search(SearchPlan {
            index: "products".to_string(),
            body: json!({"query": {"match_all": {}}}),
        });
        let err = source.execute(&plan).await.unwrap_err();
        assert!(matches!(err, QueryError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_live_source_needs_an_address() {
        let factory = ElasticSourceFactory::new();
        let config = ConnectionConfig::new("products", BackendKind::Elastic);
        assert!(matches!(
            factory.create_source(config).await,
            Err(QueryError::InvalidConfiguration(_))
        ));

        let config = ConnectionConfig::new("products", BackendKind::Elastic)
            .with_endpoint("http://localhost:9200");
        let source = factory.create_source(config).await.unwrap();
        assert_eq!(source.kind(), BackendKind::Elastic);
    }
}
