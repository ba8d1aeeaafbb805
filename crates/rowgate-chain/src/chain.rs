//! Ordered, cancelable handler pipeline for one logical request

use crate::context::ChainContext;
use crate::gateway::Gateway;
use crate::request::{Request, Response};
use async_trait::async_trait;
use http::Method;
use rowgate_query::{QueryError, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle of one chain instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Created,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Created => write!(f, "created"),
            ChainState::Running => write!(f, "running"),
            ChainState::Completed => write!(f, "completed"),
            ChainState::Canceled => write!(f, "canceled"),
            ChainState::Failed => write!(f, "failed"),
        }
    }
}

/// A step in the chain.
///
/// A handler either returns and lets the chain continue, calls
/// [`Chain::cancel`] to make the current response final, or calls
/// [`Chain::go`] to run the remaining handlers before doing more work itself.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, chain: &mut Chain<'_>, req: &mut Request, res: &mut Response) -> Result<()>;
}

pub struct Chain<'a> {
    gateway: &'a Gateway,
    handlers: Vec<Arc<dyn Handler>>,
    cursor: usize,
    state: ChainState,
    depth: usize,
    context: &'a mut ChainContext,
}

impl<'a> Chain<'a> {
    /// Root chain; it owns the lifetime of the scoped entries in `context`
    pub fn new(
        gateway: &'a Gateway,
        handlers: Vec<Arc<dyn Handler>>,
        context: &'a mut ChainContext,
    ) -> Self {
        Self {
            gateway,
            handlers,
            cursor: 0,
            state: ChainState::Created,
            depth: 0,
            context,
        }
    }

    pub fn gateway(&self) -> &'a Gateway {
        self.gateway
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Nesting level; 0 for the root invocation
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }

    pub fn context(&self) -> &ChainContext {
        &*self.context
    }

    pub fn context_mut(&mut self) -> &mut ChainContext {
        &mut *self.context
    }

    /// Skip every handler that has not run yet
    pub fn cancel(&mut self) {
        if self.state == ChainState::Running {
            debug!(
                "Chain canceled at depth {} after {} of {} handlers",
                self.depth,
                self.cursor,
                self.handlers.len()
            );
            self.state = ChainState::Canceled;
        }
    }

    /// Run the remaining handlers in order.
    ///
    /// Returns once they have all run or one of them canceled the chain.
    pub async fn go(&mut self, req: &mut Request, res: &mut Response) -> Result<()> {
        while self.state == ChainState::Running && self.cursor < self.handlers.len() {
            let handler = Arc::clone(&self.handlers[self.cursor]);
            self.cursor += 1;
            debug!("Chain depth {} -> handler '{}'", self.depth, handler.name());
            handler.handle(self, req, res).await?;
        }
        Ok(())
    }

    /// Run the chain to a terminal state
    pub async fn run(&mut self, req: &mut Request, res: &mut Response) -> Result<()> {
        if self.state != ChainState::Created {
            return Err(QueryError::Internal(format!(
                "chain for {} already {}",
                req, self.state
            )));
        }

        self.state = ChainState::Running;
        let outcome = self.go(req, res).await;

        self.state = match (&outcome, self.state) {
            (Err(_), _) => ChainState::Failed,
            (Ok(()), ChainState::Canceled) => ChainState::Canceled,
            _ => ChainState::Completed,
        };

        if self.depth == 0 {
            self.context.teardown();
        }

        outcome
    }

    /// Serve a nested request in-process.
    ///
    /// The nested chain shares this chain's context but has its own cursor
    /// and state. Its failure comes back as an error response; the caller
    /// decides whether that fails the current step.
    pub async fn include(&mut self, method: Method, url: &str, body: Option<Value>) -> Result<Response> {
        let max_depth = self.gateway.config().max_include_depth;
        if self.depth >= max_depth {
            return Err(QueryError::OperationNotSupported(format!(
                "nested requests are limited to a depth of {}",
                max_depth
            )));
        }

        let mut req = self.gateway.request(method, url, body)?;
        let mut res = Response::new();
        let mut child = Chain {
            gateway: self.gateway,
            handlers: self.gateway.handlers(),
            cursor: 0,
            state: ChainState::Created,
            depth: self.depth + 1,
            context: &mut *self.context,
        };

        debug!("Including {} at depth {}", req, child.depth);
        if let Err(e) = child.run(&mut req, &mut res).await {
            warn!("Nested request {} failed: {}", req, e);
            res = Response::from_error(&e, req.path());
        }
        Ok(res)
    }
}

/// Turn a failed nested response into the error of the step that spawned it
pub fn nested_failure(url: &str, res: &Response) -> QueryError {
    let message = res
        .find("detail")
        .and_then(Value::as_str)
        .unwrap_or("nested request failed")
        .to_string();
    QueryError::Nested {
        url: url.to_string(),
        status: res.status.as_u16(),
        message,
    }
}
