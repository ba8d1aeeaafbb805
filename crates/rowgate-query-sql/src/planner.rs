use rowgate_query::{
    AccessPlan, BackendKind, Comparison, DataRow, Entity, Operator, Planner, Predicate, Query,
    QueryError, Result, SortDirection, SqlBuilder, SqlDialect, SqlPlan, StatementKind,
};
use serde_json::Value;
use tracing::debug;

/// Compiles RQL into parameterized SQL
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlPlanner {
    dialect: SqlDialect,
}

impl SqlPlanner {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn write_columns<'a>(&self, b: &mut SqlBuilder, columns: impl Iterator<Item = &'a str>) {
        for (i, column) in columns.enumerate() {
            if i > 0 {
                b.push(", ");
            }
            b.push_ident(column);
        }
    }

    fn write_where(&self, b: &mut SqlBuilder, entity: &Entity, root: Option<&Predicate>) -> Result<()> {
        if let Some(root) = root {
            b.push(" WHERE ");
            self.write_predicate(b, entity, root, true)?;
        }
        Ok(())
    }

    fn write_predicate(
        &self,
        b: &mut SqlBuilder,
        entity: &Entity,
        predicate: &Predicate,
        top: bool,
    ) -> Result<()> {
        let (joiner, children) = match predicate {
            Predicate::Compare(c) => return self.write_comparison(b, entity, c),
            Predicate::And(children) => (" AND ", children),
            Predicate::Or(children) => (" OR ", children),
        };

        if children.len() == 1 {
            return self.write_predicate(b, entity, &children[0], top);
        }

        if !top {
            b.push("(");
        }
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                b.push(joiner);
            }
            self.write_predicate(b, entity, child, false)?;
        }
        if !top {
            b.push(")");
        }
        Ok(())
    }

    fn write_comparison(&self, b: &mut SqlBuilder, entity: &Entity, c: &Comparison) -> Result<()> {
        let column = entity.column_for(&c.attribute)?;
        let value = c.value();
        b.push_ident(&column.name);

        match c.op {
            Operator::Eq | Operator::Ne => {
                let negate = c.op == Operator::Ne;
                match (value, c.pattern()) {
                    (Value::Null, _) => {
                        b.push(if negate { " IS NOT NULL" } else { " IS NULL" });
                    }
                    (_, Some(pattern)) => {
                        b.push(if negate { " NOT LIKE " } else { " LIKE " })
                            .bind(Value::String(pattern.replace('*', "%")));
                    }
                    _ => {
                        b.push(if negate { " <> " } else { " = " })
                            .bind(column.field_type.coerce(value)?);
                    }
                }
            }
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                if value.is_null() {
                    return Err(QueryError::unsupported(format!(
                        "'{}' cannot compare '{}' with null",
                        c.op, c.attribute
                    )));
                }
                let symbol = match c.op {
                    Operator::Lt => " < ",
                    Operator::Le => " <= ",
                    Operator::Gt => " > ",
                    _ => " >= ",
                };
                b.push(symbol).bind(column.field_type.coerce(value)?);
            }
            Operator::In => {
                b.push(" IN (");
                for (i, v) in c.values.iter().enumerate() {
                    if i > 0 {
                        b.push(", ");
                    }
                    b.bind(column.field_type.coerce(v)?);
                }
                b.push(")");
            }
            Operator::Sw | Operator::Contains => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => {
                        return Err(QueryError::unsupported(format!(
                            "'{}' needs a value for '{}'",
                            c.op, c.attribute
                        )))
                    }
                    other => other.to_string(),
                };
                let pattern = if c.op == Operator::Sw {
                    format!("{}%", text)
                } else {
                    format!("%{}%", text)
                };
                b.push(" LIKE ").bind(Value::String(pattern));
            }
        }
        Ok(())
    }

    fn write_order_and_page(&self, b: &mut SqlBuilder, entity: &Entity, query: &Query) -> Result<()> {
        if !query.sort.is_empty() {
            b.push(" ORDER BY ");
            for (i, key) in query.sort.iter().enumerate() {
                if i > 0 {
                    b.push(", ");
                }
                let column = entity.column_for(&key.attribute)?;
                b.push_ident(&column.name).push(match key.direction {
                    SortDirection::Asc => " ASC",
                    SortDirection::Desc => " DESC",
                });
            }
        }

        b.push(&format!(" LIMIT {}", query.page.size()));
        let offset = query.page.offset();
        if offset > 0 {
            b.push(&format!(" OFFSET {}", offset));
        }
        Ok(())
    }

    fn key_column_names(entity: &Entity) -> Result<Vec<String>> {
        Ok(entity.key_columns()?.into_iter().map(|c| c.name.clone()).collect())
    }

    fn finish(&self, b: SqlBuilder) -> AccessPlan {
        let plan = b.build();
        debug!("Planned SQL: {}", plan);
        AccessPlan::Sql(plan)
    }
}

impl Planner for SqlPlanner {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    fn plan_select(&self, entity: &Entity, query: &Query) -> Result<AccessPlan> {
        let table = entity.table();
        let mut b = SqlPlan::builder(self.dialect, StatementKind::Select);

        b.push("SELECT ");
        self.write_columns(&mut b, table.columns.iter().map(|c| c.name.as_str()));
        b.push(" FROM ").push_ident(&table.name);
        self.write_where(&mut b, entity, query.root.as_ref())?;
        self.write_order_and_page(&mut b, entity, query)?;

        Ok(self.finish(b))
    }

    fn plan_key_selection(&self, entity: &Entity, query: &Query) -> Result<AccessPlan> {
        let root = query.root.as_ref().ok_or_else(|| {
            QueryError::UnconditionalMutationRejected(format!(
                "refusing to select every row of '{}' for deletion",
                entity.table().name
            ))
        })?;

        let keys = Self::key_column_names(entity)?;
        let mut b = SqlPlan::builder(self.dialect, StatementKind::Select);
        b.push("SELECT ");
        self.write_columns(&mut b, keys.iter().map(String::as_str));
        b.push(" FROM ").push_ident(&entity.table().name);
        self.write_where(&mut b, entity, Some(root))?;

        Ok(self.finish(b))
    }

    fn plan_batch_selection(&self, _entity: &Entity, fragments: Vec<AccessPlan>) -> Result<AccessPlan> {
        let statements = fragments
            .into_iter()
            .map(|f| match f {
                AccessPlan::Sql(p) => Ok(p),
                other => Err(QueryError::Internal(format!(
                    "cannot merge a {} plan into SQL",
                    other.backend_kind()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let union = SqlPlan::union(statements)?;
        debug!("Planned SQL: {}", union);
        Ok(AccessPlan::Sql(union))
    }

    fn plan_delete(&self, entity: &Entity, keys: &[Vec<Value>]) -> Result<AccessPlan> {
        if keys.is_empty() {
            return Err(QueryError::UnconditionalMutationRejected(
                "a delete needs at least one key".into(),
            ));
        }

        let columns = entity.key_columns()?;
        let mut b = SqlPlan::builder(self.dialect, StatementKind::Delete);
        b.push("DELETE FROM ").push_ident(&entity.table().name).push(" WHERE ");

        if columns.len() == 1 {
            b.push_ident(&columns[0].name).push(" IN (");
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    b.push(", ");
                }
                let value = key.first().cloned().unwrap_or(Value::Null);
                b.bind(columns[0].field_type.coerce(&value)?);
            }
            b.push(")");
        } else {
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    b.push(" OR ");
                }
                b.push("(");
                for (j, (column, value)) in columns.iter().zip(key).enumerate() {
                    if j > 0 {
                        b.push(" AND ");
                    }
                    b.push_ident(&column.name)
                        .push(" = ")
                        .bind(column.field_type.coerce(value)?);
                }
                b.push(")");
            }
        }

        Ok(self.finish(b))
    }

    fn plan_insert(&self, entity: &Entity, row: &DataRow) -> Result<AccessPlan> {
        if row.is_empty() {
            return Err(QueryError::invalid_body("nothing to insert"));
        }

        let mut b = SqlPlan::builder(self.dialect, StatementKind::Insert);
        b.push("INSERT INTO ").push_ident(&entity.table().name).push(" (");
        self.write_columns(&mut b, row.keys().map(String::as_str));
        b.push(") VALUES (");
        for (i, value) in row.values().enumerate() {
            if i > 0 {
                b.push(", ");
            }
            b.bind(value.clone());
        }
        b.push(")");

        if self.dialect == SqlDialect::Postgres {
            let keys = Self::key_column_names(entity)?;
            b.push(" RETURNING ");
            self.write_columns(&mut b, keys.iter().map(String::as_str));
        }

        Ok(self.finish(b))
    }

    fn plan_update(&self, entity: &Entity, query: &Query, row: &DataRow) -> Result<AccessPlan> {
        let root = query.root.as_ref().ok_or_else(|| {
            QueryError::UnconditionalMutationRejected(format!(
                "refusing to update every row of '{}'",
                entity.table().name
            ))
        })?;

        let keys = Self::key_column_names(entity)?;
        let assignments: Vec<(&String, &Value)> = row
            .iter()
            .filter(|(column, _)| !keys.iter().any(|k| k.eq_ignore_ascii_case(column)))
            .collect();
        if assignments.is_empty() {
            return Err(QueryError::invalid_body("nothing to update"));
        }

        let mut b = SqlPlan::builder(self.dialect, StatementKind::Update);
        b.push("UPDATE ").push_ident(&entity.table().name).push(" SET ");
        for (i, (column, value)) in assignments.into_iter().enumerate() {
            if i > 0 {
                b.push(", ");
            }
            b.push_ident(column).push(" = ").bind(value.clone());
        }
        self.write_where(&mut b, entity, Some(root))?;

        Ok(self.finish(b))
    }
}
