//! DynamoDB backend for rowgate
//!
//! [`WideColumnPlanner`] picks the cheapest access path for a filter:
//!
//! - `GetItem` when the full primary key is bound by equality and nothing else
//! - `Query` against the index whose keys the filter covers best
//! - `Scan` with everything in the filter expression otherwise
//!
//! [`DynamoExecutor`] sends the resulting requests through `aws-sdk-dynamodb`.

mod convert;
mod executor;
mod planner;

pub use executor::DynamoExecutor;
pub use planner::WideColumnPlanner;

use async_trait::async_trait;
use rowgate_query::{
    AccessPlan, BackendKind, ConnectionConfig, DataSource, DataSourceFactory, DetachedExecutor,
    Executor, Planner, RawResultSet, Result,
};
use std::sync::Arc;
use tracing::debug;

pub struct DynamoSource {
    name: String,
    planner: WideColumnPlanner,
    executor: Arc<dyn Executor>,
}

impl DynamoSource {
    pub fn new(name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            name: name.into(),
            planner: WideColumnPlanner::new(),
            executor,
        }
    }
}

#[async_trait]
impl DataSource for DynamoSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Dynamo
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

/// Creates [`DynamoSource`]s from configuration
#[derive(Debug, Clone, Default)]
pub struct DynamoSourceFactory {
    detached: bool,
}

impl DynamoSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detached() -> Self {
        Self { detached: true }
    }
}

#[async_trait]
impl DataSourceFactory for DynamoSourceFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Dynamo
    }

    async fn create_source(&self, config: ConnectionConfig) -> Result<Arc<dyn DataSource>> {
        let executor: Arc<dyn Executor> = if self.detached {
            Arc::new(DetachedExecutor::new(&config.name))
        } else {
            Arc::new(DynamoExecutor::connect(&config).await?)
        };

        debug!("Created DynamoDB source '{}'", config.name);
        Ok(Arc::new(DynamoSource::new(config.name, executor)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_source_plans_but_does_not_run() {
        let factory = DynamoSourceFactory::detached();
        let config = ConnectionConfig::new("orders", BackendKind::Dynamo);
        let source = factory.create_source(config).await.unwrap();

        assert_eq!(source.name(), "orders");
        assert_eq!(source.planner().kind(), BackendKind::Dynamo);

        let plan = AccessPlan::WideColumn(rowgate_query::WideColumnPlan::new(
            "orders",
            rowgate_query::WideColumnMode::Scan,
        ));
        let err = source.execute(&plan).await.unwrap_err();
        assert!(matches!(err, rowgate_query::QueryError::BackendUnavailable(_)));
    }
}
