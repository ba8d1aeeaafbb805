//! Access plans: backend-specific, fully resolved call descriptions
//!
//! A plan is produced by a [`crate::Planner`] and consumed by an
//! [`crate::Executor`]. Plans are plain data and render a textual form used
//! for `explain` output and debug logging.

use crate::error::{QueryError, Result};
use crate::types::{BackendKind, DataRow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// SQL dialect, decides identifier quoting and placeholder syntax
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Postgres,
    #[serde(alias = "mariadb")]
    MySql,
}

impl SqlDialect {
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            SqlDialect::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Placeholder for the 1-based argument position
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", position),
            SqlDialect::MySql => "?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// Parameterized SQL statement.
///
/// The text is kept as fragments separated by argument slots so placeholders
/// can be renumbered when statements are combined.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPlan {
    pub dialect: SqlDialect,
    pub kind: StatementKind,
    fragments: Vec<String>,
    args: Vec<Value>,
}

impl SqlPlan {
    pub fn builder(dialect: SqlDialect, kind: StatementKind) -> SqlBuilder {
        SqlBuilder {
            dialect,
            kind,
            fragments: vec![String::new()],
            args: Vec::new(),
        }
    }

    /// Render the statement with dialect placeholders
    pub fn sql(&self) -> String {
        let mut out = String::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            out.push_str(fragment);
            if i < self.args.len() {
                out.push_str(&self.dialect.placeholder(i + 1));
            }
        }
        out
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Combine SELECT statements with `UNION`, renumbering arguments
    pub fn union(plans: Vec<SqlPlan>) -> Result<SqlPlan> {
        let mut plans = plans.into_iter();
        let first = plans
            .next()
            .ok_or_else(|| QueryError::Internal("union of zero statements".into()))?;
        if first.kind != StatementKind::Select {
            return Err(QueryError::Internal("only SELECT statements can be combined".into()));
        }

        let mut builder = SqlBuilder::from_plan(first);
        for plan in plans {
            if plan.kind != StatementKind::Select || plan.dialect != builder.dialect {
                return Err(QueryError::Internal(
                    "UNION members must be SELECT statements of one dialect".into(),
                ));
            }
            builder.push("\nUNION\n");
            builder.append(plan);
        }
        Ok(builder.build())
    }
}

impl fmt::Display for SqlPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SqlSpec sql='{}' args=[", self.sql())?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str("]")
    }
}

/// Incremental builder for [`SqlPlan`]
#[derive(Debug)]
pub struct SqlBuilder {
    dialect: SqlDialect,
    kind: StatementKind,
    fragments: Vec<String>,
    args: Vec<Value>,
}

impl SqlBuilder {
    fn from_plan(plan: SqlPlan) -> Self {
        Self {
            dialect: plan.dialect,
            kind: plan.kind,
            fragments: plan.fragments,
            args: plan.args,
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        if let Some(last) = self.fragments.last_mut() {
            last.push_str(sql);
        }
        self
    }

    pub fn push_ident(&mut self, name: &str) -> &mut Self {
        let quoted = self.dialect.quote_ident(name);
        self.push(&quoted)
    }

    /// Append an argument slot
    pub fn bind(&mut self, value: Value) -> &mut Self {
        self.args.push(value);
        self.fragments.push(String::new());
        self
    }

    fn append(&mut self, plan: SqlPlan) {
        let mut fragments = plan.fragments.into_iter();
        if let Some(head) = fragments.next() {
            self.push(&head);
        }
        self.fragments.extend(fragments);
        self.args.extend(plan.args);
    }

    pub fn build(self) -> SqlPlan {
        SqlPlan {
            dialect: self.dialect,
            kind: self.kind,
            fragments: self.fragments,
            args: self.args,
        }
    }
}

/// Wide-column request shape
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum WideColumnMode {
    GetItem,
    Query,
    Scan,
    PutItem,
    BatchDelete,
}

/// Fully resolved wide-column request
#[derive(Debug, Clone, PartialEq)]
pub struct WideColumnPlan {
    pub table: String,
    pub mode: WideColumnMode,
    /// Chosen index; `None` for scans and mutations
    pub index: Option<String>,
    pub index_is_primary: bool,
    /// GetItem key, hash first
    pub key: Vec<(String, Value)>,
    pub key_condition: Option<String>,
    pub filter: Option<String>,
    /// Expression values in binding order (`:var1`, `:var2`, ...)
    pub values: Vec<(String, Value)>,
    /// Expression name aliases (`#status` -> `status`)
    pub names: Vec<(String, String)>,
    pub limit: Option<u64>,
    pub scan_forward: bool,
    /// PutItem payload
    pub item: Option<DataRow>,
    /// BatchDelete keys
    pub delete_keys: Vec<Vec<(String, Value)>>,
}

impl WideColumnPlan {
    pub fn new(table: impl Into<String>, mode: WideColumnMode) -> Self {
        Self {
            table: table.into(),
            mode,
            index: None,
            index_is_primary: false,
            key: Vec::new(),
            key_condition: None,
            filter: None,
            values: Vec::new(),
            names: Vec::new(),
            limit: None,
            scan_forward: true,
            item: None,
            delete_keys: Vec::new(),
        }
    }
}

fn write_plain(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => f.write_str(s),
        other => write!(f, "{}", other),
    }
}

impl fmt::Display for WideColumnPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = &self.index {
            write!(f, "Index={} ", index)?;
        }

        match self.mode {
            WideColumnMode::GetItem => {
                f.write_str("GetItemSpec")?;
                let labels = [("partKeyCol", "partKeyVal"), ("sortKeyCol", "sortKeyVal")];
                for ((col, val), (col_label, val_label)) in self.key.iter().zip(labels) {
                    write!(f, " {}={} {}=", col_label, col, val_label)?;
                    write_plain(f, val)?;
                }
                return Ok(());
            }
            WideColumnMode::Query => f.write_str("QuerySpec")?,
            WideColumnMode::Scan => f.write_str("ScanSpec")?,
            WideColumnMode::PutItem => {
                let item = self
                    .item
                    .as_ref()
                    .map(|i| Value::Object(i.clone()))
                    .unwrap_or(Value::Null);
                return write!(f, "PutItemSpec table={} item={}", self.table, item);
            }
            WideColumnMode::BatchDelete => {
                return write!(
                    f,
                    "BatchDeleteSpec table={} keys={}",
                    self.table,
                    self.delete_keys.len()
                );
            }
        }

        if let Some(limit) = self.limit {
            write!(f, " maxPageSize={}", limit)?;
        }
        if !self.scan_forward {
            f.write_str(" scanIndexForward=false")?;
        }
        if let Some(kc) = &self.key_condition {
            write!(f, " keyConditionExpression='{}'", kc)?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " filterExpression='{}'", filter)?;
        }
        if !self.names.is_empty() {
            f.write_str(" nameMap={")?;
            for (i, (alias, name)) in self.names.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}={}", alias, name)?;
            }
            f.write_str("}")?;
        }
        if !self.values.is_empty() {
            f.write_str(" valueMap={")?;
            for (i, (var, value)) in self.values.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}=", var)?;
                write_plain(f, value)?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

/// Search-index request: target index plus query DSL body
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub index: String,
    pub body: Value,
}

impl fmt::Display for SearchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SearchSpec index={} body={}", self.index, self.body)
    }
}

/// Backend-specific description of one call
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPlan {
    Sql(SqlPlan),
    WideColumn(WideColumnPlan),
    Search(SearchPlan),
}

impl AccessPlan {
    pub fn backend_kind(&self) -> BackendKind {
        match self {
            AccessPlan::Sql(_) => BackendKind::Sql,
            AccessPlan::WideColumn(_) => BackendKind::Dynamo,
            AccessPlan::Search(_) => BackendKind::Elastic,
        }
    }

    pub fn is_mutation(&self) -> bool {
        match self {
            AccessPlan::Sql(p) => p.kind != StatementKind::Select,
            AccessPlan::WideColumn(p) => {
                matches!(p.mode, WideColumnMode::PutItem | WideColumnMode::BatchDelete)
            }
            AccessPlan::Search(_) => false,
        }
    }
}

impl fmt::Display for AccessPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPlan::Sql(p) => p.fmt(f),
            AccessPlan::WideColumn(p) => p.fmt(f),
            AccessPlan::Search(p) => p.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn select(dialect: SqlDialect, table: &str, id: i64) -> SqlPlan {
        let mut b = SqlPlan::builder(dialect, StatementKind::Select);
        b.push("SELECT ")
            .push_ident("id")
            .push(" FROM ")
            .push_ident(table)
            .push(" WHERE ")
            .push_ident("id")
            .push(" = ")
            .bind(json!(id));
        b.build()
    }

    #[test]
    fn test_union_renumbers_placeholders() {
        let union = SqlPlan::union(vec![
            select(SqlDialect::Postgres, "orders", 1),
            select(SqlDialect::Postgres, "orders", 2),
        ])
        .unwrap();

        assert_eq!(
            union.sql(),
            "SELECT \"id\" FROM \"orders\" WHERE \"id\" = $1\nUNION\nSELECT \"id\" FROM \"orders\" WHERE \"id\" = $2"
        );
        assert_eq!(union.args(), &[json!(1), json!(2)]);
    }

    #[test]
    fn test_mysql_placeholders() {
        let plan = select(SqlDialect::MySql, "orders", 7);
        assert_eq!(plan.sql(), "SELECT `id` FROM `orders` WHERE `id` = ?");
        assert!(!AccessPlan::Sql(plan).is_mutation());
    }

    #[test]
    fn test_wide_column_display() {
        let mut plan = WideColumnPlan::new("orders", WideColumnMode::Query);
        plan.index = Some("Primary Index".into());
        plan.key_condition = Some("hk = :var1 and sk > :var2".into());
        plan.values = vec![(":var1".into(), json!(12345)), (":var2".into(), json!("AAAAA"))];
        assert_eq!(
            plan.to_string(),
            "Index=Primary Index QuerySpec keyConditionExpression='hk = :var1 and sk > :var2' valueMap={:var1=12345, :var2=AAAAA}"
        );

        let mut get = WideColumnPlan::new("orders", WideColumnMode::GetItem);
        get.index = Some("Primary Index".into());
        get.key = vec![("hk".into(), json!(11058)), ("sk".into(), json!("ORDER"))];
        assert_eq!(
            get.to_string(),
            "Index=Primary Index GetItemSpec partKeyCol=hk partKeyVal=11058 sortKeyCol=sk sortKeyVal=ORDER"
        );
    }
}
