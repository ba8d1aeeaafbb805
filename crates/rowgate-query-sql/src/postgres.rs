//! PostgreSQL executor and catalog reflection

use async_trait::async_trait;
use rowgate_query::{
    AccessPlan, CatalogReflector, Collection, Column, ConnectionConfig, DataRow, Entity, Executor,
    FieldType, Index, QueryError, RawResultSet, Result, SqlPlan, StatementKind, Table,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};

type Param = Box<dyn ToSql + Sync + Send>;

/// Server parameter types an argument can be converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Text,
}

impl ParamKind {
    fn of(ty: &Type) -> Self {
        match ty.name() {
            "bool" => ParamKind::Bool,
            "int2" => ParamKind::Int2,
            "int4" => ParamKind::Int4,
            "int8" => ParamKind::Int8,
            "float4" => ParamKind::Float4,
            "float8" => ParamKind::Float8,
            "json" | "jsonb" => ParamKind::Json,
            "uuid" => ParamKind::Uuid,
            "timestamp" => ParamKind::Timestamp,
            "timestamptz" => ParamKind::TimestampTz,
            "date" => ParamKind::Date,
            _ => ParamKind::Text,
        }
    }
}

/// Runs SQL plans against PostgreSQL
pub struct PostgresExecutor {
    client: Arc<RwLock<Client>>,
    database_name: String,
    timeout: Duration,
}

impl PostgresExecutor {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let host = config.host.as_deref().unwrap_or("localhost");
        let port = config.port.unwrap_or(5432);
        let username = config.username.as_deref().unwrap_or("postgres");
        let database = config.database.as_deref().unwrap_or("postgres");

        let mut conn = format!(
            "host={} port={} user={} dbname={}",
            host, port, username, database
        );
        if let Some(password) = &config.password {
            conn.push_str(&format!(" password={}", password));
        }

        debug!(
            "Connecting to PostgreSQL: {}@{}:{}/{}",
            username, host, port, database
        );

        let timeout = Duration::from_millis(config.timeout_ms);
        let (client, connection) = tokio::time::timeout(timeout, tokio_postgres::connect(&conn, NoTls))
            .await
            .map_err(|_| QueryError::QueryTimeout(config.timeout_ms))?
            .map_err(|e| {
                QueryError::BackendUnavailable(format!("PostgreSQL connection failed: {}", e))
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        debug!("Successfully connected to PostgreSQL database: {}", database);

        Ok(Self {
            client: Arc::new(RwLock::new(client)),
            database_name: database.to_string(),
            timeout,
        })
    }

    /// Map PostgreSQL type to FieldType
    pub fn map_pg_type(pg_type: &str) -> FieldType {
        match pg_type {
            "boolean" | "bool" => FieldType::Boolean,
            "smallint" | "int2" => FieldType::Int32,
            "integer" | "int" | "int4" => FieldType::Int32,
            "bigint" | "int8" => FieldType::Int64,
            "real" | "float4" => FieldType::Float32,
            "double precision" | "float8" => FieldType::Float64,
            "numeric" | "decimal" => FieldType::Float64,
            "date" => FieldType::Date,
            "timestamp"
            | "timestamp without time zone"
            | "timestamp with time zone"
            | "timestamptz" => FieldType::Timestamp,
            "json" | "jsonb" => FieldType::Json,
            "uuid" => FieldType::Uuid,
            _ => FieldType::String,
        }
    }

    fn row_to_datarow(row: &Row) -> DataRow {
        let mut data_row = DataRow::new();
        for (idx, column) in row.columns().iter().enumerate() {
            data_row.insert(column.name().to_string(), Self::extract_value(row, idx));
        }
        data_row
    }

    fn extract_value(row: &Row, idx: usize) -> Value {
        let column = &row.columns()[idx];

        match column.type_().name() {
            "bool" => row
                .try_get::<_, Option<bool>>(idx)
                .ok()
                .flatten()
                .map(Value::Bool),
            "int2" => row
                .try_get::<_, Option<i16>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into())),
            "int4" => row
                .try_get::<_, Option<i32>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into())),
            "int8" => row
                .try_get::<_, Option<i64>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into())),
            "float4" => row
                .try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(Value::Number),
            "float8" => row
                .try_get::<_, Option<f64>>(idx)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            "timestamp" => row
                .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string())),
            "timestamptz" => row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_rfc3339())),
            "date" => row
                .try_get::<_, Option<chrono::NaiveDate>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string())),
            "json" | "jsonb" => row.try_get::<_, Option<Value>>(idx).ok().flatten(),
            "uuid" => row
                .try_get::<_, Option<uuid::Uuid>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string())),
            _ => row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(Value::String),
        }
        .unwrap_or(Value::Null)
    }

    /// Convert a JSON argument to the parameter type the server inferred
    fn to_param(value: &Value, ty: &Type) -> Result<Param> {
        let kind = ParamKind::of(ty);
        let bad = || {
            QueryError::malformed(format!("value {} cannot be sent as {}", value, ty.name()))
        };

        if value.is_null() {
            let param: Param = match kind {
                ParamKind::Bool => Box::new(None::<bool>),
                ParamKind::Int2 => Box::new(None::<i16>),
                ParamKind::Int4 => Box::new(None::<i32>),
                ParamKind::Int8 => Box::new(None::<i64>),
                ParamKind::Float4 => Box::new(None::<f32>),
                ParamKind::Float8 => Box::new(None::<f64>),
                ParamKind::Json => Box::new(None::<Value>),
                ParamKind::Uuid => Box::new(None::<uuid::Uuid>),
                ParamKind::Timestamp => Box::new(None::<chrono::NaiveDateTime>),
                ParamKind::TimestampTz => Box::new(None::<chrono::DateTime<chrono::Utc>>),
                ParamKind::Date => Box::new(None::<chrono::NaiveDate>),
                ParamKind::Text => Box::new(None::<String>),
            };
            return Ok(param);
        }

        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let param: Param = match kind {
            ParamKind::Bool => Box::new(value.as_bool().ok_or_else(bad)?),
            ParamKind::Int2 => Box::new(text.parse::<i16>().map_err(|_| bad())?),
            ParamKind::Int4 => Box::new(text.parse::<i32>().map_err(|_| bad())?),
            ParamKind::Int8 => Box::new(text.parse::<i64>().map_err(|_| bad())?),
            ParamKind::Float4 => Box::new(text.parse::<f32>().map_err(|_| bad())?),
            ParamKind::Float8 => Box::new(text.parse::<f64>().map_err(|_| bad())?),
            ParamKind::Json => Box::new(value.clone()),
            ParamKind::Uuid => Box::new(text.parse::<uuid::Uuid>().map_err(|_| bad())?),
            ParamKind::Timestamp => {
                Box::new(text.parse::<chrono::NaiveDateTime>().map_err(|_| bad())?)
            }
            ParamKind::TimestampTz => Box::new(
                chrono::DateTime::parse_from_rfc3339(&text)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .map_err(|_| bad())?,
            ),
            ParamKind::Date => Box::new(text.parse::<chrono::NaiveDate>().map_err(|_| bad())?),
            ParamKind::Text => Box::new(text),
        };
        Ok(param)
    }

    async fn run(&self, client: &Client, plan: &SqlPlan, sql: &str) -> Result<RawResultSet> {
        let start = Instant::now();
        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| Self::map_pg_error(e, sql))?;

        let params = plan
            .args()
            .iter()
            .zip(statement.params())
            .map(|(v, ty)| Self::to_param(v, ty))
            .collect::<Result<Vec<Param>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        if plan.kind == StatementKind::Select || !statement.columns().is_empty() {
            let rows = client
                .query(&statement, &refs)
                .await
                .map_err(|e| Self::map_pg_error(e, sql))?;
            let data: Vec<DataRow> = rows.iter().map(Self::row_to_datarow).collect();
            let mut result = RawResultSet::new(data, start.elapsed().as_millis() as u64);
            if plan.kind != StatementKind::Select {
                result.stats.rows_affected = result.rows.len() as u64;
            }
            Ok(result)
        } else {
            let affected = client
                .execute(&statement, &refs)
                .await
                .map_err(|e| Self::map_pg_error(e, sql))?;
            Ok(RawResultSet::affected(
                affected,
                start.elapsed().as_millis() as u64,
            ))
        }
    }

    fn map_pg_error(e: tokio_postgres::Error, sql: &str) -> QueryError {
        error!("PostgreSQL query failed: {}", e);
        error!("Failed SQL: {}", sql);

        if let Some(db_error) = e.as_db_error() {
            let mut msg = db_error.message().to_string();
            if let Some(detail) = db_error.detail() {
                msg.push_str(&format!("\nDetail: {}", detail));
            }
            if let Some(hint) = db_error.hint() {
                msg.push_str(&format!("\nHint: {}", hint));
            }
            QueryError::BackendFailure(msg)
        } else if e.is_closed() {
            QueryError::BackendUnavailable(e.to_string())
        } else {
            QueryError::BackendFailure(e.to_string())
        }
    }
}

#[async_trait]
impl Executor for PostgresExecutor {
    async fn execute(&self, plan: &AccessPlan) -> Result<RawResultSet> {
        let AccessPlan::Sql(plan) = plan else {
            return Err(QueryError::Internal(format!(
                "PostgreSQL cannot execute a {} plan",
                plan.backend_kind()
            )));
        };

        let sql = plan.sql();
        let client = self.client.read().await;

        debug!("Executing SQL on {}: {}", self.database_name, sql);

        let result = tokio::time::timeout(self.timeout, self.run(&client, plan, &sql))
            .await
            .map_err(|_| QueryError::QueryTimeout(self.timeout.as_millis() as u64))??;

        debug!(
            "SQL returned {} rows ({} affected) in {}ms",
            result.stats.row_count, result.stats.rows_affected, result.stats.execution_ms
        );
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing PostgreSQL connection");
        Ok(())
    }
}

/// Builds collections from `information_schema`, one per table
pub struct PostgresReflector {
    executor: Arc<PostgresExecutor>,
    schema: String,
}

impl PostgresReflector {
    pub fn new(executor: Arc<PostgresExecutor>, schema: impl Into<String>) -> Self {
        Self {
            executor,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl CatalogReflector for PostgresReflector {
    async fn reflect(&self, backend: &str) -> Result<Vec<Collection>> {
        let client = self.executor.client.read().await;

        let columns_sql = r#"
            SELECT table_name, column_name, data_type, is_nullable
            FROM information_schema.columns
            WHERE table_schema = $1
            ORDER BY table_name, ordinal_position
        "#;
        let keys_sql = r#"
            SELECT kcu.table_name, kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1
            ORDER BY kcu.table_name, kcu.ordinal_position
        "#;

        let columns = client
            .query(columns_sql, &[&self.schema])
            .await
            .map_err(|e| Self::reflect_error(e, &self.schema))?;
        let keys = client
            .query(keys_sql, &[&self.schema])
            .await
            .map_err(|e| Self::reflect_error(e, &self.schema))?;

        let mut tables: Vec<Table> = Vec::new();
        for row in &columns {
            let table_name: String = row.get(0);
            let column_name: String = row.get(1);
            let data_type: String = row.get(2);
            let is_nullable: String = row.get(3);

            if tables.last().map(|t| t.name != table_name).unwrap_or(true) {
                tables.push(Table::new(table_name.clone(), backend));
            }
            if let Some(table) = tables.last_mut() {
                let mut column = Column::new(
                    column_name,
                    PostgresExecutor::map_pg_type(&data_type),
                );
                column.nullable = is_nullable == "YES";
                table.columns.push(column);
            }
        }

        let mut collections = Vec::with_capacity(tables.len());
        for mut table in tables {
            let pk: Vec<String> = keys
                .iter()
                .filter(|r| r.get::<_, String>(0) == table.name)
                .map(|r| r.get::<_, String>(1))
                .collect();
            // Composite relational keys are exposed through the entity key, not a hash/range index
            if let Some(first) = pk.first() {
                table.indexes.push(Index::primary(first.clone(), None));
            }

            let name = table.name.clone();
            let entity = Entity::from_parts(table, Vec::new(), pk)?;
            collections.push(Collection::new(name, entity));
        }

        debug!(
            "Reflected {} tables from schema '{}' for backend '{}'",
            collections.len(),
            self.schema,
            backend
        );
        Ok(collections)
    }
}

impl PostgresReflector {
    fn reflect_error(e: tokio_postgres::Error, schema: &str) -> QueryError {
        QueryError::BackendFailure(format!("Failed to reflect schema '{}': {}", schema, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_type_mapping() {
        assert_eq!(PostgresExecutor::map_pg_type("integer"), FieldType::Int32);
        assert_eq!(PostgresExecutor::map_pg_type("bigint"), FieldType::Int64);
        assert_eq!(PostgresExecutor::map_pg_type("text"), FieldType::String);
        assert_eq!(
            PostgresExecutor::map_pg_type("timestamp with time zone"),
            FieldType::Timestamp
        );
        assert_eq!(PostgresExecutor::map_pg_type("uuid"), FieldType::Uuid);
        assert_eq!(PostgresExecutor::map_pg_type("jsonb"), FieldType::Json);
    }

    #[test]
    fn test_params_follow_server_types() {
        assert!(PostgresExecutor::to_param(&Value::from(11058), &Type::INT8).is_ok());
        assert!(PostgresExecutor::to_param(&Value::from("11058"), &Type::INT4).is_ok());
        assert!(PostgresExecutor::to_param(&Value::Null, &Type::INT4).is_ok());
        assert!(matches!(
            PostgresExecutor::to_param(&Value::from("abc"), &Type::INT8),
            Err(QueryError::MalformedQuery(_))
        ));
        assert!(PostgresExecutor::to_param(&Value::from("x"), &Type::TEXT).is_ok());
    }
}
