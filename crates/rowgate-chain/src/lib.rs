//! Request execution for rowgate
//!
//! A [`Gateway`] owns the catalog, the registered data sources and the
//! handler list. Every request runs through a [`Chain`]: handlers added with
//! [`Gateway::with_handler`] first, then the REST action that plans and
//! executes against the collection's backend.
//!
//! Nested requests (batch POST, PUT and DELETE bodies) run as nested chains
//! through [`Chain::include`], sharing the root's [`ChainContext`].

pub mod actions;
pub mod chain;
pub mod context;
pub mod gateway;
pub mod problem;
pub mod request;

pub use actions::{BatchDelete, RestAction, BATCH_DELETE};
pub use chain::{nested_failure, Chain, ChainState, Handler};
pub use context::{ChainContext, ContextKey};
pub use gateway::{DeletePolicy, Gateway, GatewayConfig, DEFAULT_MAX_INCLUDE_DEPTH};
pub use request::{Change, Request, Response};

// Re-export external dependencies
pub use async_trait;
pub use http;
