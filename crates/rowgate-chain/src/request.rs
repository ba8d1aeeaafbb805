use crate::problem;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use rowgate_query::QueryError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::warn;
use url::Url;

/// Normalized inbound request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub collection: String,
    pub entity_key: Option<String>,
    /// Decoded query terms in request order
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    /// Case-insensitive parameter lookup
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Remove every occurrence of a parameter, returning the first value
    pub fn remove_param(&mut self, name: &str) -> Option<String> {
        let mut first = None;
        self.params.retain(|(k, v)| {
            if !k.eq_ignore_ascii_case(name) {
                return true;
            }
            first.get_or_insert_with(|| v.clone());
            false
        });
        first
    }

    /// `host[:port]` as addressed by the caller
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A row-level change made while serving a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub action: String,
    pub collection: String,
    pub key: String,
}

impl Change {
    pub fn new(method: &Method, collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            action: method.as_str().to_string(),
            collection: collection.into(),
            key: key.into(),
        }
    }
}

/// Outbound response descriptor
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: StatusCode,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub changes: Vec<Change>,
    /// Textual form of every access plan the request produced
    pub plans: Vec<String>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_error(error: &QueryError, instance: &str) -> Self {
        let problem = problem::from_error(error, instance);
        Self {
            status: problem.status_code,
            body: Some(problem.into_body()),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replace a header; names or values that are not valid HTTP are dropped
    pub fn set_header(&mut self, name: &str, value: impl AsRef<str>) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!("Dropping invalid header '{}'", name),
        }
    }

    /// Look up a dotted path (`data.0.href`) in the body
    pub fn find(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self.body.as_ref()?, |node, segment| match node {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(map) => map.get(segment),
            _ => None,
        })
    }
}
