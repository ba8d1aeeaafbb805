//! Problem bodies for failed requests (RFC 7807)

use chrono::Utc;
use http::StatusCode;
use rowgate_query::QueryError;
use serde_json::{Map, Value};

/// A problem body under construction
#[derive(Debug, Clone)]
pub struct Problem {
    pub status_code: StatusCode,
    pub body: Map<String, Value>,
}

pub fn new(status_code: StatusCode) -> Problem {
    Problem {
        status_code,
        body: Map::new(),
    }
    .with_value("status", status_code.as_u16())
}

impl Problem {
    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.with_value("title", title.into())
    }

    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        self.with_value("detail", detail.into())
    }

    /// URL of the request that failed
    pub fn with_instance(self, instance: impl Into<String>) -> Self {
        self.with_value("instance", instance.into())
    }

    pub fn with_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    pub fn into_body(self) -> Value {
        Value::Object(self.body)
    }
}

/// Build the problem for an error; server-side causes are never exposed
pub fn from_error(error: &QueryError, instance: &str) -> Problem {
    let problem = new(error.status_code())
        .with_title(error.title())
        .with_detail(error.public_detail())
        .with_instance(instance)
        .with_value("timestamp", Utc::now().to_rfc3339());

    match error {
        QueryError::Nested { url, .. } => problem.with_value("nested", url.as_str()),
        _ => problem,
    }
}
