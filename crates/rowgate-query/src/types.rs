use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of backend a table lives in
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Relational database reached through SQL
    Sql,
    /// Wide-column store (hash/range keyed, DynamoDB)
    Dynamo,
    /// Search index (Elasticsearch)
    Elastic,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sql => write!(f, "sql"),
            BackendKind::Dynamo => write!(f, "dynamo"),
            BackendKind::Elastic => write!(f, "elastic"),
        }
    }
}

/// Field data types a column can declare
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Boolean true/false
    Boolean,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// UTF-8 string
    #[default]
    String,
    /// ISO 8601 date
    Date,
    /// ISO 8601 timestamp
    Timestamp,
    /// JSON object
    Json,
    /// UUID
    Uuid,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Int32 => write!(f, "int32"),
            FieldType::Int64 => write!(f, "int64"),
            FieldType::Float32 => write!(f, "float32"),
            FieldType::Float64 => write!(f, "float64"),
            FieldType::String => write!(f, "string"),
            FieldType::Date => write!(f, "date"),
            FieldType::Timestamp => write!(f, "timestamp"),
            FieldType::Json => write!(f, "json"),
            FieldType::Uuid => write!(f, "uuid"),
        }
    }
}

impl FieldType {
    /// Coerce a parsed literal into this type.
    ///
    /// Null passes through untouched; everything else must be representable
    /// in the target type or the literal is reported as malformed.
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        let fail = || {
            QueryError::malformed(format!("value {} is not a valid {}", value, self))
        };

        match self {
            FieldType::Int32 | FieldType::Int64 => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(|i| Value::Number(i.into()))
                    .map_err(|_| fail()),
                _ => Err(fail()),
            },
            FieldType::Float32 | FieldType::Float64 => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(fail),
                _ => Err(fail()),
            },
            FieldType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Bool(true)),
                    "false" | "0" => Ok(Value::Bool(false)),
                    _ => Err(fail()),
                },
                Value::Number(n) => Ok(Value::Bool(n.as_i64().unwrap_or(0) != 0)),
                _ => Err(fail()),
            },
            FieldType::Json => Ok(value.clone()),
            FieldType::String
            | FieldType::Date
            | FieldType::Timestamp
            | FieldType::Uuid => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(fail()),
            },
        }
    }
}

/// A row of data as ordered key-value pairs
pub type DataRow = serde_json::Map<String, Value>;

/// Statistics about a backend call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryStats {
    pub row_count: usize,
    /// Rows written by a mutation
    pub rows_affected: u64,
    /// Execution time in milliseconds
    pub execution_ms: u64,
    /// Whether the backend reported more results past this page
    pub has_more: bool,
}

/// Raw result of executing an access plan, rows still in physical column names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResultSet {
    pub rows: Vec<DataRow>,
    pub stats: QueryStats,
}

impl RawResultSet {
    pub fn new(rows: Vec<DataRow>, execution_ms: u64) -> Self {
        let row_count = rows.len();
        Self {
            rows,
            stats: QueryStats {
                row_count,
                execution_ms,
                ..Default::default()
            },
        }
    }

    /// Result of a mutation that returns no rows
    pub fn affected(rows_affected: u64, execution_ms: u64) -> Self {
        Self {
            rows: Vec::new(),
            stats: QueryStats {
                rows_affected,
                execution_ms,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Sql.to_string(), "sql");
        assert_eq!(BackendKind::Dynamo.to_string(), "dynamo");
        assert_eq!(BackendKind::Elastic.to_string(), "elastic");
    }

    #[test]
    fn test_coerce_numeric_strings() {
        assert_eq!(FieldType::Int64.coerce(&json!("11058")).unwrap(), json!(11058));
        assert_eq!(FieldType::Float64.coerce(&json!("2.5")).unwrap(), json!(2.5));
        assert!(FieldType::Int32.coerce(&json!("abc")).is_err());
    }

    #[test]
    fn test_coerce_to_string_and_null() {
        assert_eq!(FieldType::String.coerce(&json!(42)).unwrap(), json!("42"));
        assert_eq!(FieldType::Int64.coerce(&Value::Null).unwrap(), Value::Null);
        assert_eq!(FieldType::Boolean.coerce(&json!("TRUE")).unwrap(), json!(true));
    }
}
