use rowgate_query::{
    AccessPlan, BackendKind, Comparison, Entity, Operator, Planner, Predicate, Query, QueryError,
    Result, SearchPlan, SortDirection,
};
use serde_json::{json, Map, Value};

/// Compiles RQL into the Elasticsearch query DSL.
///
/// Read-only: mutations fall through to the trait defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchPlanner;

impl SearchPlanner {
    pub fn new() -> Self {
        Self
    }

    fn compile(entity: &Entity, predicate: &Predicate) -> Result<Value> {
        match predicate {
            Predicate::Compare(cmp) => Self::compile_leaf(entity, cmp),
            Predicate::And(children) => {
                let must = children
                    .iter()
                    .map(|c| Self::compile(entity, c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(json!({"bool": {"must": must}}))
            }
            Predicate::Or(children) => {
                let should = children
                    .iter()
                    .map(|c| Self::compile(entity, c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(json!({"bool": {"should": should, "minimum_should_match": 1}}))
            }
        }
    }

    fn compile_leaf(entity: &Entity, cmp: &Comparison) -> Result<Value> {
        let column = entity.column_for(&cmp.attribute)?;
        let field = column.name.as_str();
        let values = cmp
            .values
            .iter()
            .map(|v| {
                if v.is_null() {
                    Ok(Value::Null)
                } else {
                    column.field_type.coerce(v)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let value = &values[0];

        let query = match cmp.op {
            Operator::Eq | Operator::Ne => {
                let positive = match (value, cmp.pattern()) {
                    (Value::Null, _) => json!({"exists": {"field": field}}),
                    (_, Some(pattern)) => json!({"wildcard": {field: {"value": pattern}}}),
                    (v, None) => json!({"term": {field: v}}),
                };
                // eq(x,null) matches documents without the field
                let negate = (cmp.op == Operator::Ne) != value.is_null();
                if negate {
                    json!({"bool": {"must_not": [positive]}})
                } else {
                    positive
                }
            }
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                if value.is_null() {
                    return Err(QueryError::unsupported(format!(
                        "{} cannot compare '{}' with null",
                        cmp.op, cmp.attribute
                    )));
                }
                let bound = match cmp.op {
                    Operator::Lt => "lt",
                    Operator::Le => "lte",
                    Operator::Gt => "gt",
                    _ => "gte",
                };
                json!({"range": {field: {bound: value}}})
            }
            Operator::In => json!({"terms": {field: values}}),
            Operator::Sw => json!({"prefix": {field: {"value": plain(value)}}}),
            Operator::Contains => {
                json!({"wildcard": {field: {"value": format!("*{}*", plain(value))}}})
            }
        };
        Ok(query)
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Planner for SearchPlanner {
    fn kind(&self) -> BackendKind {
        BackendKind::Elastic
    }

    fn plan_select(&self, entity: &Entity, query: &Query) -> Result<AccessPlan> {
        let mut body = Map::new();

        let filter = match &query.root {
            Some(root) => Self::compile(entity, root)?,
            None => json!({"match_all": {}}),
        };
        body.insert("query".into(), filter);

        if !query.sort.is_empty() {
            let sort = query
                .sort
                .iter()
                .map(|key| {
                    let column = entity.column_for(&key.attribute)?;
                    let order = match key.direction {
                        SortDirection::Asc => "asc",
                        SortDirection::Desc => "desc",
                    };
                    Ok(json!({column.name.as_str(): {"order": order}}))
                })
                .collect::<Result<Vec<_>>>()?;
            body.insert("sort".into(), Value::Array(sort));
        }

        if query.page.offset() > 0 {
            body.insert("from".into(), json!(query.page.offset()));
        }
        body.insert("size".into(), json!(query.page.size()));

        Ok(AccessPlan::Search(SearchPlan {
            index: entity.table().name.clone(),
            body: Value::Object(body),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgate_query::rql::parse;
    use rowgate_query::{FieldType, Table};

    fn products() -> Entity {
        let table = Table::new("products", "search")
            .with_column("id", FieldType::Int64)
            .with_column("name", FieldType::String)
            .with_column("price", FieldType::Float64)
            .with_column("discontinued", FieldType::Boolean);
        Entity::new(table).unwrap()
    }

    fn body(rql: &str) -> Value {
        let query = parse(rql).unwrap();
        match SearchPlanner::new().plan_select(&products(), &query).unwrap() {
            AccessPlan::Search(plan) => {
                assert_eq!(plan.index, "products");
                plan.body
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn test_no_filter_matches_all() {
        assert_eq!(
            body(""),
            json!({"query": {"match_all": {}}, "size": 100})
        );
    }

    #[test]
    fn test_conjunction_becomes_must() {
        assert_eq!(
            body("and(eq(name,Chai),ge(price,10))&limit=5")["query"],
            json!({"bool": {"must": [
                {"term": {"name": "Chai"}},
                {"range": {"price": {"gte": 10}}}
            ]}})
        );
    }

    #[test]
    fn test_disjunction_becomes_should() {
        assert_eq!(
            body("or(sw(name,Ch),in(id,1,2))")["query"],
            json!({"bool": {"should": [
                {"prefix": {"name": {"value": "Ch"}}},
                {"terms": {"id": [1, 2]}}
            ], "minimum_should_match": 1}})
        );
    }

    #[test]
    fn test_null_and_negation() {
        assert_eq!(
            body("eq(name,null)")["query"],
            json!({"bool": {"must_not": [{"exists": {"field": "name"}}]}})
        );
        assert_eq!(
            body("ne(name,null)")["query"],
            json!({"exists": {"field": "name"}})
        );
        assert_eq!(
            body("ne(discontinued,true)")["query"],
            json!({"bool": {"must_not": [{"term": {"discontinued": true}}]}})
        );
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(
            body("eq(name,Ch*i)")["query"],
            json!({"wildcard": {"name": {"value": "Ch*i"}}})
        );
        assert_eq!(
            body("eq(name,'Ch*i')")["query"],
            json!({"term": {"name": "Ch*i"}})
        );
        assert_eq!(
            body("contains(name,ang)")["query"],
            json!({"wildcard": {"name": {"value": "*ang*"}}})
        );
    }

    #[test]
    fn test_sort_and_paging() {
        let body = body("sort=-price,name&page=3&pageSize=20");
        assert_eq!(
            body["sort"],
            json!([{"price": {"order": "desc"}}, {"name": {"order": "asc"}}])
        );
        assert_eq!(body["from"], json!(40));
        assert_eq!(body["size"], json!(20));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let query = parse("eq(colour,red)").unwrap();
        let err = SearchPlanner::new().plan_select(&products(), &query).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedPredicate(_)));
    }

    #[test]
    fn test_mutations_not_supported() {
        let err = SearchPlanner::new()
            .plan_delete(&products(), &[vec![json!(1)]])
            .unwrap_err();
        assert!(matches!(err, QueryError::OperationNotSupported(_)));
    }
}
