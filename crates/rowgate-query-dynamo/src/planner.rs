//! Index selection for wide-column tables
//!
//! One pass per request picks the cheapest access path:
//!
//! 1. `GetItem` when the primary hash key and range key (if any) are bound by
//!    equality and nothing else needs filtering.
//! 2. `Query` against the index with the best range-key coverage among those
//!    whose hash key is bound by equality.
//! 3. `Scan` with every predicate in the filter expression.
//!
//! Values bind as `:var1`, `:var2`, ... key condition first, then the filter
//! in request order.

use rowgate_query::{
    AccessPlan, BackendKind, Column, DataRow, Entity, Index, Operator, Planner, Predicate, Query,
    QueryError, Result, SortDirection, SortKey, WideColumnMode, WideColumnPlan,
};
use serde_json::Value;
use tracing::{debug, warn};

/// Words DynamoDB refuses as bare names in expressions
const RESERVED_WORDS: &[&str] = &[
    "action", "add", "all", "and", "attribute", "between", "by", "case", "column", "comment",
    "count", "data", "date", "day", "delete", "desc", "end", "from", "group", "hash", "hour", "in",
    "index", "item", "key", "keys", "level", "limit", "location", "month", "name", "not", "null",
    "number", "or", "order", "owner", "path", "range", "role", "second", "select", "set", "size",
    "source", "state", "status", "table", "text", "time", "timestamp", "to", "ttl", "type",
    "update", "user", "value", "values", "view", "where", "year", "zone",
];

/// A top-level comparison resolved against the table
#[derive(Debug, Clone)]
struct Leaf<'a> {
    attribute: String,
    column: &'a Column,
    op: Operator,
    values: Vec<Value>,
}

impl Leaf<'_> {
    fn is_eq_binding(&self) -> bool {
        self.op == Operator::Eq && !self.values[0].is_null()
    }

    fn on(&self, column: &str) -> bool {
        self.column.name.eq_ignore_ascii_case(column)
    }
}

/// One conjunct of the request predicate
#[derive(Debug)]
enum Term<'a> {
    Leaf(Leaf<'a>),
    /// An OR subtree, only ever usable as a filter
    Tree(&'a Predicate),
}

/// How well a candidate index's range key is bound, higher wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Coverage {
    Unbound,
    Comparator,
    Equality,
}

struct Candidate<'i> {
    index: &'i Index,
    hash: usize,
    range: Option<usize>,
    coverage: Coverage,
}

/// Accumulates expression placeholders and name aliases
#[derive(Default)]
struct Expressions {
    values: Vec<(String, Value)>,
    names: Vec<(String, String)>,
}

impl Expressions {
    fn bind(&mut self, value: Value) -> String {
        let var = format!(":var{}", self.values.len() + 1);
        self.values.push((var.clone(), value));
        var
    }

    fn name(&mut self, column: &str) -> String {
        let plain = column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && column.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
        if plain && !RESERVED_WORDS.contains(&column.to_ascii_lowercase().as_str()) {
            return column.to_string();
        }

        let alias = format!(
            "#{}",
            column
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect::<String>()
        );
        if !self.names.iter().any(|(a, _)| a == &alias) {
            self.names.push((alias.clone(), column.to_string()));
        }
        alias
    }

    fn leaf(&mut self, leaf: &Leaf<'_>) -> String {
        let name = self.name(&leaf.column.name);
        let value = &leaf.values[0];
        match leaf.op {
            Operator::Eq if value.is_null() => format!("attribute_not_exists({})", name),
            Operator::Ne if value.is_null() => format!("attribute_exists({})", name),
            Operator::Eq => format!("{} = {}", name, self.bind(value.clone())),
            Operator::Ne => format!("{} <> {}", name, self.bind(value.clone())),
            Operator::Lt => format!("{} < {}", name, self.bind(value.clone())),
            Operator::Le => format!("{} <= {}", name, self.bind(value.clone())),
            Operator::Gt => format!("{} > {}", name, self.bind(value.clone())),
            Operator::Ge => format!("{} >= {}", name, self.bind(value.clone())),
            Operator::Sw => format!("begins_with({},{})", name, self.bind(value.clone())),
            Operator::Contains => format!("contains({},{})", name, self.bind(value.clone())),
            Operator::In => {
                let vars: Vec<String> = leaf.values.iter().map(|v| self.bind(v.clone())).collect();
                format!("{} IN ({})", name, vars.join(", "))
            }
        }
    }

    fn tree(&mut self, entity: &Entity, predicate: &Predicate, nested: bool) -> Result<String> {
        let (joiner, children) = match predicate {
            Predicate::Compare(c) => {
                let leaf = resolve(entity, &c.attribute, c.op, &c.values)?;
                return Ok(self.leaf(&leaf));
            }
            Predicate::And(children) => (" and ", children),
            Predicate::Or(children) => (" or ", children),
        };

        if children.len() == 1 {
            return self.tree(entity, &children[0], nested);
        }

        let parts = children
            .iter()
            .map(|c| self.tree(entity, c, true))
            .collect::<Result<Vec<_>>>()?;
        let joined = parts.join(joiner);
        Ok(if nested { format!("({})", joined) } else { joined })
    }
}

fn resolve<'a>(entity: &'a Entity, attribute: &str, op: Operator, values: &[Value]) -> Result<Leaf<'a>> {
    let column = entity.column_for(attribute)?;
    let values = values
        .iter()
        .map(|v| match (op, v) {
            (_, Value::Null) => Ok(Value::Null),
            (Operator::Sw | Operator::Contains, Value::String(_)) => Ok(v.clone()),
            (Operator::Sw | Operator::Contains, other) => Ok(Value::String(other.to_string())),
            _ => column.field_type.coerce(v),
        })
        .collect::<Result<Vec<_>>>()?;

    if values.is_empty() || (op != Operator::Eq && op != Operator::Ne && values[0].is_null()) {
        return Err(QueryError::unsupported(format!(
            "'{}' on '{}' needs a non-null value",
            op, attribute
        )));
    }

    Ok(Leaf {
        attribute: attribute.to_string(),
        column,
        op,
        values,
    })
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Plans reads and writes against hash/range keyed tables
#[derive(Debug, Clone, Copy, Default)]
pub struct WideColumnPlanner;

impl WideColumnPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Split the predicate into top-level terms, dropping exact duplicates
    fn terms<'a>(entity: &'a Entity, root: Option<&'a Predicate>) -> Result<Vec<Term<'a>>> {
        let mut terms: Vec<Term<'a>> = Vec::new();

        for conjunct in root.map(|r| r.conjuncts()).unwrap_or_default() {
            let Predicate::Compare(c) = conjunct else {
                terms.push(Term::Tree(conjunct));
                continue;
            };

            let leaf = resolve(entity, &c.attribute, c.op, &c.values)?;
            if leaf.is_eq_binding() {
                let existing = terms.iter().find_map(|t| match t {
                    Term::Leaf(l) if l.is_eq_binding() && l.on(&leaf.column.name) => Some(l),
                    _ => None,
                });
                if let Some(existing) = existing {
                    if existing.values[0] == leaf.values[0] {
                        continue;
                    }
                    return Err(QueryError::AmbiguousKeyBinding {
                        attribute: leaf.attribute.clone(),
                        first: render(&existing.values[0]),
                        second: render(&leaf.values[0]),
                    });
                }
            }
            terms.push(Term::Leaf(leaf));
        }

        Ok(terms)
    }

    fn eq_binding(terms: &[Term<'_>], column: &str) -> Option<usize> {
        terms.iter().position(|t| matches!(t, Term::Leaf(l) if l.is_eq_binding() && l.on(column)))
    }

    fn range_binding(terms: &[Term<'_>], column: &str) -> Option<usize> {
        terms.iter().position(|t| matches!(t, Term::Leaf(l) if l.op.is_range() && l.on(column)))
    }

    fn choose_index<'i>(indexes: Vec<&'i Index>, terms: &[Term<'_>]) -> Option<Candidate<'i>> {
        let mut best: Option<Candidate<'i>> = None;

        for index in indexes {
            let Some(hash) = Self::eq_binding(terms, &index.hash_key) else {
                continue;
            };

            let (range, coverage) = match &index.range_key {
                Some(rk) => match Self::eq_binding(terms, rk) {
                    Some(i) => (Some(i), Coverage::Equality),
                    None => match Self::range_binding(terms, rk) {
                        Some(i) => (Some(i), Coverage::Comparator),
                        None => (None, Coverage::Unbound),
                    },
                },
                None => (None, Coverage::Unbound),
            };

            // Strictly better only, so earlier (higher precedence) indexes win ties
            if best.as_ref().map_or(true, |b| coverage > b.coverage) {
                best = Some(Candidate {
                    index,
                    hash,
                    range,
                    coverage,
                });
            }
        }

        best
    }

    /// Sorting is only possible along the range key of the index being queried
    fn scan_direction(entity: &Entity, sort: &[SortKey], index: Option<&Index>) -> Result<bool> {
        let Some(key) = sort.first() else {
            return Ok(true);
        };

        let column = entity.column_for(&key.attribute)?;
        let along_range = sort.len() == 1
            && index
                .and_then(|i| i.range_key.as_deref())
                .is_some_and(|rk| rk.eq_ignore_ascii_case(&column.name));

        if !along_range {
            return Err(QueryError::operation_not_supported(format!(
                "sort on '{}' is only possible along the range key of the chosen index",
                key.attribute
            )));
        }
        Ok(key.direction == SortDirection::Asc)
    }

    fn plan_read(
        &self,
        entity: &Entity,
        root: Option<&Predicate>,
        sort: &[SortKey],
        limit: Option<u64>,
    ) -> Result<WideColumnPlan> {
        let table = entity.table();
        let terms = Self::terms(entity, root)?;
        let mut plan = WideColumnPlan::new(&table.name, WideColumnMode::Scan);

        if let Some(primary) = table.primary_index() {
            let hash = Self::eq_binding(&terms, &primary.hash_key);
            // None: no range key; Some(None): range key not bound by equality
            let range = primary
                .range_key
                .as_deref()
                .map(|rk| Self::eq_binding(&terms, rk));
            let fully_bound = hash.is_some() && range.map_or(true, |r| r.is_some());
            let key_terms = 1 + usize::from(range.is_some());

            if fully_bound && terms.len() == key_terms {
                plan.mode = WideColumnMode::GetItem;
                plan.index = Some(primary.name.clone());
                plan.index_is_primary = true;
                for i in hash.into_iter().chain(range.flatten()) {
                    if let Term::Leaf(leaf) = &terms[i] {
                        plan.key.push((leaf.column.name.clone(), leaf.values[0].clone()));
                    }
                }
                debug!("Planned wide-column read: {}", plan);
                return Ok(plan);
            }
        }

        let mut expressions = Expressions::default();
        let mut consumed: Vec<usize> = Vec::new();

        if let Some(chosen) = Self::choose_index(table.indexes_by_precedence(), &terms) {
            plan.mode = WideColumnMode::Query;
            plan.index = Some(chosen.index.name.clone());
            plan.index_is_primary = chosen.index.is_primary();
            plan.scan_forward = Self::scan_direction(entity, sort, Some(chosen.index))?;

            let mut key_condition = Vec::new();
            for i in std::iter::once(chosen.hash).chain(chosen.range) {
                if let Term::Leaf(leaf) = &terms[i] {
                    key_condition.push(expressions.leaf(leaf));
                    consumed.push(i);
                }
            }
            plan.key_condition = Some(key_condition.join(" and "));
            debug!(
                "Index '{}' chosen with {:?} range coverage",
                chosen.index.name, chosen.coverage
            );
        } else {
            Self::scan_direction(entity, sort, None)?;
            warn!(
                "No index hash key is bound by equality on '{}', falling back to a full table scan",
                table.name
            );
        }

        let mut filter = Vec::new();
        for (i, term) in terms.iter().enumerate() {
            if consumed.contains(&i) {
                continue;
            }
            filter.push(match term {
                Term::Leaf(leaf) => expressions.leaf(leaf),
                Term::Tree(tree) => expressions.tree(entity, tree, true)?,
            });
        }
        if !filter.is_empty() {
            plan.filter = Some(filter.join(" and "));
        }

        plan.values = expressions.values;
        plan.names = expressions.names;
        plan.limit = limit;

        debug!("Planned wide-column read: {}", plan);
        Ok(plan)
    }

    fn key_of(entity: &Entity, values: &[Value]) -> Result<Vec<(String, Value)>> {
        let columns = entity.key_columns()?;
        if columns.len() != values.len() {
            return Err(QueryError::Internal(format!(
                "'{}' keys have {} part(s), got {}",
                entity.table().name,
                columns.len(),
                values.len()
            )));
        }
        columns
            .iter()
            .zip(values)
            .map(|(c, v)| Ok((c.name.clone(), c.field_type.coerce(v)?)))
            .collect()
    }
}

impl Planner for WideColumnPlanner {
    fn kind(&self) -> BackendKind {
        BackendKind::Dynamo
    }

    fn plan_select(&self, entity: &Entity, query: &Query) -> Result<AccessPlan> {
        if query.page.number() > 1 {
            return Err(QueryError::operation_not_supported(
                "wide-column collections only serve the first page; narrow the query or raise the page size",
            ));
        }

        let plan = self.plan_read(
            entity,
            query.root.as_ref(),
            &query.sort,
            Some(query.page.size()),
        )?;
        Ok(AccessPlan::WideColumn(plan))
    }

    fn plan_key_selection(&self, entity: &Entity, query: &Query) -> Result<AccessPlan> {
        let root = query.root.as_ref().ok_or_else(|| {
            QueryError::UnconditionalMutationRejected(format!(
                "refusing to select every item of '{}' for deletion",
                entity.table().name
            ))
        })?;

        let plan = self.plan_read(entity, Some(root), &[], None)?;
        Ok(AccessPlan::WideColumn(plan))
    }

    fn plan_delete(&self, entity: &Entity, keys: &[Vec<Value>]) -> Result<AccessPlan> {
        if keys.is_empty() {
            return Err(QueryError::UnconditionalMutationRejected(
                "a delete needs at least one key".into(),
            ));
        }

        let mut plan = WideColumnPlan::new(&entity.table().name, WideColumnMode::BatchDelete);
        plan.delete_keys = keys
            .iter()
            .map(|k| Self::key_of(entity, k))
            .collect::<Result<Vec<_>>>()?;

        debug!("Planned wide-column delete: {}", plan);
        Ok(AccessPlan::WideColumn(plan))
    }

    fn plan_insert(&self, entity: &Entity, row: &DataRow) -> Result<AccessPlan> {
        for column in entity.key_columns()? {
            let present = row
                .iter()
                .any(|(name, v)| name.eq_ignore_ascii_case(&column.name) && !v.is_null());
            if !present {
                return Err(QueryError::invalid_body(format!(
                    "items in '{}' need a value for key column '{}'",
                    entity.table().name,
                    column.name
                )));
            }
        }

        let mut plan = WideColumnPlan::new(&entity.table().name, WideColumnMode::PutItem);
        plan.item = Some(row.clone());
        Ok(AccessPlan::WideColumn(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgate_query::{rql, Attribute, FieldType, Table};
    use serde_json::json;

    fn orders() -> Entity {
        let table = Table::new("orders", "dynamo")
            .with_column("hk", FieldType::Int64)
            .with_column("sk", FieldType::String)
            .with_column("ls1", FieldType::String)
            .with_column("ls2", FieldType::String)
            .with_column("gs1hk", FieldType::Int64)
            .with_column("gs1sk", FieldType::String)
            .with_column("status", FieldType::String)
            .with_index(Index::primary("hk", Some("sk")))
            .with_index(Index::local_secondary("ls1", "hk", "ls1"))
            .with_index(Index::local_secondary("ls2", "hk", "ls2"))
            .with_index(Index::global_secondary("gs1", "gs1hk", Some("gs1sk")));

        let rename = |name: &str, column: &str| Attribute {
            name: name.to_string(),
            column: column.to_string(),
        };
        Entity::from_parts(
            table,
            vec![
                rename("orderId", "hk"),
                rename("type", "sk"),
                rename("shipCity", "ls1"),
                rename("shipName", "ls2"),
                rename("employeeId", "gs1hk"),
                rename("orderDate", "gs1sk"),
            ],
            vec![],
        )
        .unwrap()
    }

    fn plan(query: &str) -> Result<WideColumnPlan> {
        let query = rql::parse(query)?;
        match WideColumnPlanner.plan_select(&orders(), &query)? {
            AccessPlan::WideColumn(p) => Ok(p),
            other => panic!("unexpected plan {}", other),
        }
    }

    #[test]
    fn test_full_primary_key_is_a_point_lookup() {
        let p = plan("orderid=11058&type=ORDER").unwrap();
        assert_eq!(p.mode, WideColumnMode::GetItem);
        assert_eq!(
            p.to_string(),
            "Index=Primary Index GetItemSpec partKeyCol=hk partKeyVal=11058 sortKeyCol=sk sortKeyVal=ORDER"
        );

        let entity = orders();
        let query = Query::default().with_predicate(entity.key_predicate("11058~ORDER").unwrap());
        let AccessPlan::WideColumn(by_key) = WideColumnPlanner.plan_select(&entity, &query).unwrap() else {
            panic!("expected wide-column plan");
        };
        assert_eq!(by_key, p);
    }

    #[test]
    fn test_hash_only_queries_primary() {
        let p = plan("orderid=11058").unwrap();
        assert_eq!(
            p.to_string(),
            "Index=Primary Index QuerySpec maxPageSize=100 keyConditionExpression='hk = :var1' valueMap={:var1=11058}"
        );
    }

    #[test]
    fn test_range_comparator_goes_into_key_condition() {
        let p = plan("eq(OrderId, 11058)&gt(type, 'AAAAA')").unwrap();
        assert_eq!(p.mode, WideColumnMode::Query);
        assert!(p.to_string().contains(
            "keyConditionExpression='hk = :var1 and sk > :var2' valueMap={:var1=11058, :var2=AAAAA}"
        ));
    }

    #[test]
    fn test_second_comparator_stays_in_filter() {
        let p = plan("eq(OrderId, 12345)&gt(type, 'AAAAA')&gt(ShipCity,A)").unwrap();
        assert_eq!(p.index.as_deref(), Some("Primary Index"));
        assert!(p.to_string().contains(
            "keyConditionExpression='hk = :var1 and sk > :var2' filterExpression='ls1 > :var3' valueMap={:var1=12345, :var2=AAAAA, :var3=A}"
        ));
    }

    #[test]
    fn test_begins_with_key_condition() {
        let p = plan("eq(OrderId, 11058)&sw(type, 'ORD')").unwrap();
        assert_eq!(
            p.key_condition.as_deref(),
            Some("hk = :var1 and begins_with(sk,:var2)")
        );
        assert_eq!(p.values[1], (":var2".to_string(), json!("ORD")));
    }

    #[test]
    fn test_local_secondary_equality_beats_primary_begins_with() {
        let p = plan("eq(OrderId, 11058)&sw(type, 'ORD')&eq(shipcity,Mannheim)").unwrap();
        assert_eq!(
            p.to_string(),
            "Index=ls1 QuerySpec maxPageSize=100 keyConditionExpression='hk = :var1 and ls1 = :var2' filterExpression='begins_with(sk,:var3)' valueMap={:var1=11058, :var2=Mannheim, :var3=ORD}"
        );
        assert!(!p.index_is_primary);
    }

    #[test]
    fn test_global_secondary_with_full_coverage_wins() {
        let p = plan(
            "eq(OrderId, 11058)&sw(type, 'ORD')&eq(EmployeeId,9)&eq(OrderDate,'2014-10-29T00:00-0400')",
        )
        .unwrap();
        assert_eq!(p.mode, WideColumnMode::Query);
        assert_eq!(p.index.as_deref(), Some("gs1"));
        assert_eq!(
            p.key_condition.as_deref(),
            Some("gs1hk = :var1 and gs1sk = :var2")
        );
        assert_eq!(
            p.filter.as_deref(),
            Some("hk = :var3 and begins_with(sk,:var4)")
        );
        let vars: Vec<&str> = p.values.iter().map(|(v, _)| v.as_str()).collect();
        assert_eq!(vars, [":var1", ":var2", ":var3", ":var4"]);
        assert_eq!(p.values[1].1, json!("2014-10-29T00:00-0400"));
    }

    #[test]
    fn test_global_secondary_is_never_a_point_lookup() {
        let p = plan("eq(employeeId,9)&eq(orderDate,2014)").unwrap();
        assert_eq!(p.mode, WideColumnMode::Query);
        assert_eq!(p.index.as_deref(), Some("gs1"));
        assert!(p.key.is_empty());
    }

    #[test]
    fn test_ties_prefer_primary_then_declaration_order() {
        // Every index with hash = hk is unbound on its range key
        let p = plan("eq(orderId,1)&ne(status,closed)").unwrap();
        assert_eq!(p.index.as_deref(), Some("Primary Index"));

        // Both local indexes fully bound, first declared wins
        let p = plan("eq(orderId,1)&eq(shipCity,A)&eq(shipName,B)").unwrap();
        assert_eq!(p.index.as_deref(), Some("ls1"));
        assert_eq!(p.filter.as_deref(), Some("ls2 = :var3"));
    }

    #[test]
    fn test_local_secondary_beats_global_secondary_on_ties() {
        // ls1 and gs1 both have their range key bound by equality
        let p = plan("eq(orderId,1)&eq(shipCity,A)&eq(employeeId,9)&eq(orderDate,x)").unwrap();
        assert_eq!(p.mode, WideColumnMode::Query);
        assert_eq!(p.index.as_deref(), Some("ls1"));
        assert_eq!(p.key_condition.as_deref(), Some("hk = :var1 and ls1 = :var2"));
        assert_eq!(p.filter.as_deref(), Some("gs1hk = :var3 and gs1sk = :var4"));
        assert_eq!(p.values[2], (":var3".to_string(), json!(9)));
        assert_eq!(p.values[3], (":var4".to_string(), json!("x")));

        // Same with comparator coverage on both range keys
        let p = plan("eq(orderId,1)&gt(shipCity,A)&eq(employeeId,9)&ge(orderDate,x)").unwrap();
        assert_eq!(p.index.as_deref(), Some("ls1"));
        assert_eq!(p.key_condition.as_deref(), Some("hk = :var1 and ls1 > :var2"));
        assert_eq!(p.filter.as_deref(), Some("gs1hk = :var3 and gs1sk >= :var4"));
    }

    #[test]
    fn test_extra_filter_prevents_point_lookup() {
        let p = plan("orderId=1&type=ORDER&gt(shipCity,M)").unwrap();
        assert_eq!(p.mode, WideColumnMode::Query);
        assert_eq!(p.index.as_deref(), Some("Primary Index"));
        assert_eq!(p.key_condition.as_deref(), Some("hk = :var1 and sk = :var2"));
        assert_eq!(p.filter.as_deref(), Some("ls1 > :var3"));
    }

    #[test]
    fn test_scan_folds_everything_into_filter() {
        let p = plan("gt(OrderId, 1)&eq(type, ORDER)").unwrap();
        assert_eq!(p.mode, WideColumnMode::Scan);
        assert_eq!(
            p.to_string(),
            "ScanSpec maxPageSize=100 filterExpression='hk > :var1 and sk = :var2' valueMap={:var1=1, :var2=ORDER}"
        );
        assert!(p.key_condition.is_none());
    }

    #[test]
    fn test_or_is_never_a_key_condition() {
        let p = plan("or(eq(orderId,1),eq(orderId,2))").unwrap();
        assert_eq!(p.mode, WideColumnMode::Scan);
        assert_eq!(p.filter.as_deref(), Some("(hk = :var1 or hk = :var2)"));

        let p = plan("eq(orderId,1)&or(eq(shipCity,A),and(eq(shipName,B),gt(type,C)))").unwrap();
        assert_eq!(p.mode, WideColumnMode::Query);
        assert_eq!(p.key_condition.as_deref(), Some("hk = :var1"));
        assert_eq!(
            p.filter.as_deref(),
            Some("(ls1 = :var2 or (ls2 = :var3 and sk > :var4))")
        );
    }

    #[test]
    fn test_contradictory_equalities_are_ambiguous() {
        let err = plan("eq(orderId,1)&eq(orderId,2)").unwrap_err();
        assert!(matches!(err, QueryError::AmbiguousKeyBinding { .. }));

        let p = plan("eq(orderId,1)&orderId=1").unwrap();
        assert_eq!(p.key_condition.as_deref(), Some("hk = :var1"));
        assert_eq!(p.values.len(), 1);
    }

    #[test]
    fn test_reserved_names_are_aliased() {
        let p = plan("eq(orderId,1)&eq(status,open)").unwrap();
        assert_eq!(p.filter.as_deref(), Some("#status = :var2"));
        assert_eq!(p.names, vec![("#status".to_string(), "status".to_string())]);
    }

    #[test]
    fn test_sort_and_paging_limits() {
        let p = plan("eq(orderId,1)&gt(type,A)&sort=-type&limit=10").unwrap();
        assert!(!p.scan_forward);
        assert_eq!(p.limit, Some(10));

        assert!(matches!(
            plan("eq(orderId,1)&sort=shipCity"),
            Err(QueryError::OperationNotSupported(_))
        ));
        assert!(matches!(
            plan("eq(orderId,1)&page=2"),
            Err(QueryError::OperationNotSupported(_))
        ));
    }

    #[test]
    fn test_unknown_attribute() {
        assert!(matches!(
            plan("eq(customer,1)"),
            Err(QueryError::UnsupportedPredicate(_))
        ));
    }

    #[test]
    fn test_mutations() {
        let entity = orders();
        let planner = WideColumnPlanner;

        assert!(matches!(
            planner.plan_key_selection(&entity, &Query::default()),
            Err(QueryError::UnconditionalMutationRejected(_))
        ));

        let AccessPlan::WideColumn(delete) = planner
            .plan_delete(&entity, &[vec![json!(1), json!("ORDER")], vec![json!("2"), json!("ORDER")]])
            .unwrap()
        else {
            panic!("expected wide-column plan");
        };
        assert_eq!(delete.mode, WideColumnMode::BatchDelete);
        assert_eq!(delete.delete_keys[1][0], ("hk".to_string(), json!(2)));

        let mut item = DataRow::new();
        item.insert("hk".into(), json!(1));
        assert!(matches!(
            planner.plan_insert(&entity, &item),
            Err(QueryError::InvalidBody(_))
        ));
        item.insert("sk".into(), json!("ORDER"));
        assert!(planner.plan_insert(&entity, &item).is_ok());
    }
}
