use http::StatusCode;
use thiserror::Error;

/// Unified error type for parsing, planning and executing requests
#[derive(Error, Debug)]
pub enum QueryError {
    /// RQL syntax error (unbalanced parentheses, unknown operator, bad arity)
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    /// An attribute does not resolve to a column, or the backend cannot express the predicate
    #[error("Unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    /// The same attribute is bound to contradictory exact-equality values
    #[error("Ambiguous key binding: attribute '{attribute}' is bound to both {first} and {second}")]
    AmbiguousKeyBinding {
        attribute: String,
        first: String,
        second: String,
    },

    /// Delete/update without any bounding predicate or explicit key
    #[error("Unconditional mutation rejected: {0}")]
    UnconditionalMutationRejected(String),

    /// Request body has the wrong shape
    #[error("Invalid body: {0}")]
    InvalidBody(String),

    /// Collection or entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not supported by this backend
    #[error("Operation not supported: {0}")]
    OperationNotSupported(String),

    /// Backend could not be reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend call failed
    #[error("Backend failure: {0}")]
    BackendFailure(String),

    /// Backend call exceeded its configured timeout
    #[error("Query timeout after {0}ms")]
    QueryTimeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A nested sub-request failed; the enclosing step fails with the child's status
    #[error("Nested request '{url}' failed with status {status}: {message}")]
    Nested {
        url: String,
        status: u16,
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        QueryError::MalformedQuery(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        QueryError::UnsupportedPredicate(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        QueryError::NotFound(msg.into())
    }

    pub fn operation_not_supported(msg: impl Into<String>) -> Self {
        QueryError::OperationNotSupported(msg.into())
    }

    pub fn invalid_body(msg: impl Into<String>) -> Self {
        QueryError::InvalidBody(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        QueryError::BackendFailure(msg.into())
    }

    /// HTTP status this error is surfaced with
    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::MalformedQuery(_)
            | QueryError::UnsupportedPredicate(_)
            | QueryError::AmbiguousKeyBinding { .. }
            | QueryError::UnconditionalMutationRejected(_)
            | QueryError::InvalidBody(_)
            | QueryError::OperationNotSupported(_) => StatusCode::BAD_REQUEST,
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Nested { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            QueryError::BackendUnavailable(_)
            | QueryError::BackendFailure(_)
            | QueryError::QueryTimeout(_)
            | QueryError::InvalidConfiguration(_)
            | QueryError::Serialization(_)
            | QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short problem title for error bodies
    pub fn title(&self) -> &'static str {
        match self {
            QueryError::MalformedQuery(_) => "Malformed Query",
            QueryError::UnsupportedPredicate(_) => "Unsupported Predicate",
            QueryError::AmbiguousKeyBinding { .. } => "Ambiguous Key Binding",
            QueryError::UnconditionalMutationRejected(_) => "Unconditional Mutation Rejected",
            QueryError::InvalidBody(_) => "Invalid Body",
            QueryError::NotFound(_) => "Not Found",
            QueryError::OperationNotSupported(_) => "Operation Not Supported",
            QueryError::Nested { .. } => "Nested Request Failed",
            _ => "Internal Server Error",
        }
    }

    /// Detail safe to show to callers; internal causes stay in the logs
    pub fn public_detail(&self) -> String {
        if self.status_code().is_server_error() {
            "The server encountered an unexpected condition".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
