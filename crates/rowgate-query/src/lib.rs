//! # rowgate-query
//!
//! Core abstractions for exposing heterogeneous backends as REST collections.
//!
//! - **Catalog**: tables, columns and indexes, and the collections/entities/attributes built over them
//! - **RQL**: the query-string language, parsed into a [`Predicate`] tree plus sort and paging
//! - **Planner**: turns an entity and a [`Query`] into a backend-specific [`AccessPlan`]
//! - **DataSource**: a named backend, pairing a planner with the executor that runs its plans
//! - **SourceRegistry**: factories and live sources, looked up by backend name
//!
//! Backend crates:
//! - `rowgate-query-sql` - relational backends
//! - `rowgate-query-dynamo` - wide-column backends with index selection
//! - `rowgate-query-elastic` - search indexes
//!
//! ## Example
//!
//! ```rust
//! use rowgate_query::rql;
//!
//! let query = rql::parse("and(eq(hk,11058),gt(sk,A))&sort=-sk&limit=10").unwrap();
//! assert_eq!(query.page.size(), 10);
//! assert_eq!(query.root.unwrap().to_string(), "and(eq(hk,11058),gt(sk,A))");
//! ```

pub mod catalog;
pub mod error;
pub mod plan;
pub mod registry;
pub mod rql;
pub mod traits;
pub mod types;

pub use catalog::{Attribute, Catalog, Collection, Column, Entity, Index, IndexKind, Table};
pub use error::{QueryError, Result};
pub use plan::{
    AccessPlan, SearchPlan, SqlBuilder, SqlDialect, SqlPlan, StatementKind, WideColumnMode,
    WideColumnPlan,
};
pub use registry::{ConnectionConfig, DataSourceFactory, SourceRegistry};
pub use rql::{Comparison, Operator, PageSpec, Predicate, Query, SortDirection, SortKey};
pub use traits::{CatalogReflector, DataSource, DetachedExecutor, Executor, Planner};
pub use types::{BackendKind, DataRow, FieldType, QueryStats, RawResultSet};
