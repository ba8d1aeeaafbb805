//! Relational backend for rowgate
//!
//! [`SqlPlanner`] compiles RQL into parameterized SQL for the Postgres and
//! MySQL dialects. [`PostgresExecutor`] runs the statements over
//! `tokio-postgres`; [`PostgresReflector`] builds collections from
//! `information_schema`.

mod planner;
mod postgres;

pub use planner::SqlPlanner;
pub use postgres::{PostgresExecutor, PostgresReflector};

use async_trait::async_trait;
use rowgate_query::{
    AccessPlan, BackendKind, ConnectionConfig, DataSource, DataSourceFactory, DetachedExecutor,
    Executor, Planner, QueryError, RawResultSet, Result, SqlDialect,
};
use std::sync::Arc;
use tracing::debug;

/// Relational data source: a dialect planner and the executor for its statements
pub struct SqlSource {
    name: String,
    planner: SqlPlanner,
    executor: Arc<dyn Executor>,
}

impl SqlSource {
    pub fn new(name: impl Into<String>, dialect: SqlDialect, executor: Arc<dyn Executor>) -> Self {
        Self {
            name: name.into(),
            planner: SqlPlanner::new(dialect),
            executor,
        }
    }
}

#[async_trait]
impl DataSource for SqlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Sql
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

/// Creates [`SqlSource`]s from configuration
#[derive(Debug, Clone, Default)]
pub struct SqlSourceFactory {
    detached: bool,
}

impl SqlSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources that plan but never connect
    pub fn detached() -> Self {
        Self { detached: true }
    }
}

#[async_trait]
impl DataSourceFactory for SqlSourceFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    async fn create_source(&self, config: ConnectionConfig) -> Result<Arc<dyn DataSource>> {
        let executor: Arc<dyn Executor> = if self.detached {
            Arc::new(DetachedExecutor::new(&config.name))
        } else {
            match config.dialect {
                SqlDialect::Postgres => Arc::new(PostgresExecutor::connect(&config).await?),
                SqlDialect::MySql => {
                    return Err(QueryError::InvalidConfiguration(format!(
                        "backend '{}': no MySQL driver is available, the mysql dialect is plan-only",
                        config.name
                    )))
                }
            }
        };

        debug!("Created SQL source '{}' ({:?})", config.name, config.dialect);
        Ok(Arc::new(SqlSource::new(config.name, config.dialect, executor)))
    }
}
