use crate::catalog::{Collection, Entity};
use crate::error::{QueryError, Result};
use crate::plan::AccessPlan;
use crate::rql::Query;
use crate::types::{BackendKind, DataRow, RawResultSet};
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use serde_json::Value;

/// Translates parsed queries into backend-specific access plans.
///
/// Planning is pure: the same entity and query always yield the same plan.
/// Only `plan_select` is mandatory; the other operations default to
/// [`QueryError::OperationNotSupported`].
pub trait Planner: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Read rows matching the query
    fn plan_select(&self, entity: &Entity, query: &Query) -> Result<AccessPlan>;

    /// Select only the key attributes of rows matching the query.
    ///
    /// Used as a batch-delete fragment; a query without any predicate is
    /// rejected with [`QueryError::UnconditionalMutationRejected`].
    fn plan_key_selection(&self, entity: &Entity, query: &Query) -> Result<AccessPlan> {
        let _ = (entity, query);
        Err(QueryError::operation_not_supported(format!(
            "{} backend cannot select keys",
            self.kind()
        )))
    }

    /// Merge key-selection fragments into a single selection
    fn plan_batch_selection(&self, entity: &Entity, mut fragments: Vec<AccessPlan>) -> Result<AccessPlan> {
        match fragments.len() {
            1 => Ok(fragments.remove(0)),
            0 => Err(QueryError::Internal(format!(
                "no selection fragments for '{}'",
                entity.table().name
            ))),
            _ => Err(QueryError::operation_not_supported(format!(
                "{} backend cannot merge several selections",
                self.kind()
            ))),
        }
    }

    /// Delete the rows with the given key values (one value list per row, key order)
    fn plan_delete(&self, entity: &Entity, keys: &[Vec<Value>]) -> Result<AccessPlan> {
        let _ = (entity, keys);
        Err(QueryError::operation_not_supported(format!(
            "{} backend does not support deletes",
            self.kind()
        )))
    }

    /// Insert one row given in physical column names
    fn plan_insert(&self, entity: &Entity, row: &DataRow) -> Result<AccessPlan> {
        let _ = (entity, row);
        Err(QueryError::operation_not_supported(format!(
            "{} backend does not support inserts",
            self.kind()
        )))
    }

    /// Update rows matching the query with the physical column values in `row`
    fn plan_update(&self, entity: &Entity, query: &Query, row: &DataRow) -> Result<AccessPlan> {
        let _ = (entity, query, row);
        Err(QueryError::operation_not_supported(format!(
            "{} backend does not support updates",
            self.kind()
        )))
    }
}

/// Performs the actual backend call for a plan
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, plan: &AccessPlan) -> Result<RawResultSet>;

    /// Release connections held by this executor
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A named backend: a planner paired with the executor that runs its plans
#[async_trait]
pub trait DataSource: Send + Sync + Downcast {
    /// Name the catalog refers to this backend by
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    fn planner(&self) -> &dyn Planner;

    async fn execute(&self, plan: &AccessPlan) -> Result<RawResultSet>;

    /// Close the connection gracefully
    async fn close(&self) -> Result<()>;
}

impl_downcast!(DataSource);

/// Produces the collections a backend exposes
#[async_trait]
pub trait CatalogReflector: Send + Sync {
    async fn reflect(&self, backend: &str) -> Result<Vec<Collection>>;
}

/// Executor for sources used only for planning; every call fails with
/// [`QueryError::BackendUnavailable`]
#[derive(Debug, Clone, Default)]
pub struct DetachedExecutor {
    backend: String,
}

impl DetachedExecutor {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }
}

#[async_trait]
impl Executor for DetachedExecutor {
    async fn execute(&self, plan: &AccessPlan) -> Result<RawResultSet> {
        Err(QueryError::BackendUnavailable(format!(
            "backend '{}' is not connected; cannot run {}",
            self.backend, plan
        )))
    }
}
