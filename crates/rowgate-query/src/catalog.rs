//! In-memory schema model
//!
//! Tables, columns and indexes describe what physically exists in a backend.
//! Collections, entities and attributes are the REST-facing view over a table.
//! A [`Catalog`] is built once at startup and shared read-only afterwards.

use crate::error::{QueryError, Result};
use crate::rql::{Operator, Predicate};
use crate::types::{DataRow, FieldType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Separator between the parts of a composite entity key in a URL
pub const KEY_PART_SEPARATOR: char = '~';
/// Separator between several entity keys in a URL
pub const KEY_LIST_SEPARATOR: char = ',';

/// Physical column of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }
}

/// Backend-specific role of an index
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Primary,
    LocalSecondary,
    GlobalSecondary,
}

impl IndexKind {
    /// Tie-break precedence, lower wins
    pub fn precedence(&self) -> u8 {
        match self {
            IndexKind::Primary => 0,
            IndexKind::LocalSecondary => 1,
            IndexKind::GlobalSecondary => 2,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Primary => write!(f, "primary"),
            IndexKind::LocalSecondary => write!(f, "local-secondary"),
            IndexKind::GlobalSecondary => write!(f, "global-secondary"),
        }
    }
}

/// Index over a table, possibly composite hash + range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub kind: IndexKind,
    pub hash_key: String,
    #[serde(default)]
    pub range_key: Option<String>,
}

impl Index {
    pub fn primary(hash_key: impl Into<String>, range_key: Option<&str>) -> Self {
        Self {
            name: "Primary Index".to_string(),
            kind: IndexKind::Primary,
            hash_key: hash_key.into(),
            range_key: range_key.map(str::to_string),
        }
    }

    pub fn local_secondary(
        name: impl Into<String>,
        hash_key: impl Into<String>,
        range_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::LocalSecondary,
            hash_key: hash_key.into(),
            range_key: Some(range_key.into()),
        }
    }

    pub fn global_secondary(
        name: impl Into<String>,
        hash_key: impl Into<String>,
        range_key: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::GlobalSecondary,
            hash_key: hash_key.into(),
            range_key: range_key.map(str::to_string),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.kind == IndexKind::Primary
    }
}

/// Physical table (or wide-column table, or search index)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Name of the backend (data source) that owns this table
    pub backend: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn new(name: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.columns.push(Column::new(name, field_type));
        self
    }

    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Case-insensitive column lookup
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_index(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.is_primary())
    }

    /// Indexes ordered primary, local-secondary, global-secondary; declaration order within a kind
    pub fn indexes_by_precedence(&self) -> Vec<&Index> {
        let mut indexes: Vec<&Index> = self.indexes.iter().collect();
        indexes.sort_by_key(|i| i.kind.precedence());
        indexes
    }

    /// Check the structural invariants of the table
    pub fn validate(&self) -> Result<()> {
        let primaries = self.indexes.iter().filter(|i| i.is_primary()).count();
        if primaries > 1 {
            return Err(QueryError::InvalidConfiguration(format!(
                "table '{}' declares {} primary indexes",
                self.name, primaries
            )));
        }

        for index in &self.indexes {
            for col in std::iter::once(&index.hash_key).chain(index.range_key.iter()) {
                if self.column(col).is_none() {
                    return Err(QueryError::InvalidConfiguration(format!(
                        "index '{}' on table '{}' references unknown column '{}'",
                        index.name, self.name, col
                    )));
                }
            }
        }

        if let Some(primary) = self.primary_index() {
            let bad_local = self.indexes.iter().find(|i| {
                i.kind == IndexKind::LocalSecondary
                    && !i.hash_key.eq_ignore_ascii_case(&primary.hash_key)
            });
            if let Some(local) = bad_local {
                return Err(QueryError::InvalidConfiguration(format!(
                    "local-secondary index '{}' must share the primary hash key '{}'",
                    local.name, primary.hash_key
                )));
            }
        }

        Ok(())
    }
}

/// Public-facing name for a column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    /// Public name; dots nest the value inside embedded objects
    pub name: String,
    pub column: String,
}

/// Logical view over a single table
#[derive(Debug, Clone)]
pub struct Entity {
    table: Table,
    attributes: Vec<Attribute>,
    key: Vec<String>,
}

impl Entity {
    /// Create an entity exposing every column under its own name.
    ///
    /// The key defaults to the primary index columns, or the first column
    /// when the table has no primary index.
    pub fn new(table: Table) -> Result<Self> {
        Self::from_parts(table, Vec::new(), Vec::new())
    }

    /// Create an entity from explicit attribute renames and key attribute names
    pub fn from_parts(table: Table, renames: Vec<Attribute>, key: Vec<String>) -> Result<Self> {
        table.validate()?;

        let mut attributes = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let name = renames
                .iter()
                .find(|a| a.column.eq_ignore_ascii_case(&column.name))
                .map(|a| a.name.clone())
                .unwrap_or_else(|| column.name.clone());
            attributes.push(Attribute {
                name,
                column: column.name.clone(),
            });
        }

        if let Some(rename) = renames.iter().find(|a| table.column(&a.column).is_none()) {
            return Err(QueryError::InvalidConfiguration(format!(
                "attribute '{}' maps to unknown column '{}' on table '{}'",
                rename.name, rename.column, table.name
            )));
        }

        let mut entity = Self {
            table,
            attributes,
            key: Vec::new(),
        };

        entity.key = if key.is_empty() {
            entity.default_key()?
        } else {
            for attr in &key {
                if entity.attribute(attr).is_none() {
                    return Err(QueryError::InvalidConfiguration(format!(
                        "key attribute '{}' is not an attribute of table '{}'",
                        attr, entity.table.name
                    )));
                }
            }
            key
        };

        Ok(entity)
    }

    fn default_key(&self) -> Result<Vec<String>> {
        let columns: Vec<String> = match self.table.primary_index() {
            Some(primary) => std::iter::once(primary.hash_key.clone())
                .chain(primary.range_key.clone())
                .collect(),
            None => self
                .table
                .columns
                .first()
                .map(|c| vec![c.name.clone()])
                .ok_or_else(|| {
                    QueryError::InvalidConfiguration(format!(
                        "table '{}' has no columns",
                        self.table.name
                    ))
                })?,
        };

        columns
            .iter()
            .map(|col| {
                self.attribute_for_column(col)
                    .map(|a| a.name.clone())
                    .ok_or_else(|| {
                        QueryError::InvalidConfiguration(format!("no attribute for key column '{}'", col))
                    })
            })
            .collect()
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Key attribute names, hash first for composite keys
    pub fn key(&self) -> &[String] {
        &self.key
    }

    /// Case-insensitive attribute lookup
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn attribute_for_column(&self, column: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.column.eq_ignore_ascii_case(column))
    }

    /// Resolve a public attribute name to its physical column
    pub fn column_for(&self, attribute: &str) -> Result<&Column> {
        self.attribute(attribute)
            .and_then(|a| self.table.column(&a.column))
            .ok_or_else(|| {
                QueryError::unsupported(format!(
                    "attribute '{}' does not exist on '{}'",
                    attribute, self.table.name
                ))
            })
    }

    /// Physical key columns in key order
    pub fn key_columns(&self) -> Result<Vec<&Column>> {
        self.key.iter().map(|a| self.column_for(a)).collect()
    }

    /// Map a physical row into public attribute names, nesting dotted names
    pub fn project_row(&self, row: &DataRow) -> DataRow {
        let mut out = DataRow::new();
        for (column, value) in row {
            let name = self
                .attribute_for_column(column)
                .map(|a| a.name.as_str())
                .unwrap_or(column.as_str());
            insert_nested(&mut out, name, value.clone());
        }
        out
    }

    /// Map a public-named body into physical column names
    pub fn to_physical_row(&self, body: &DataRow) -> Result<DataRow> {
        let mut flat = DataRow::new();
        flatten_into(&mut flat, "", body, self);

        let mut out = DataRow::new();
        for (name, value) in flat {
            let column = self.column_for(&name).map_err(|_| {
                QueryError::invalid_body(format!(
                    "'{}' is not an attribute of '{}'",
                    name, self.table.name
                ))
            })?;
            out.insert(column.name.clone(), column.field_type.coerce(&value)?);
        }
        Ok(out)
    }

    /// Extract key values from a physical row
    pub fn key_values(&self, row: &DataRow) -> Result<Vec<Value>> {
        self.key_columns()?
            .into_iter()
            .map(|col| {
                row.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&col.name))
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        QueryError::Internal(format!(
                            "row from '{}' is missing key column '{}'",
                            self.table.name, col.name
                        ))
                    })
            })
            .collect()
    }

    /// Render key values as they appear in a URL (`11058~ORDER`)
    pub fn encode_key(values: &[Value]) -> String {
        values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(&KEY_PART_SEPARATOR.to_string())
    }

    /// Parse an entity key path segment into one value list per key
    pub fn parse_entity_key(&self, entity_key: &str) -> Result<Vec<Vec<Value>>> {
        let columns = self.key_columns()?;

        entity_key
            .split(KEY_LIST_SEPARATOR)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|key| {
                let parts: Vec<&str> = key.split(KEY_PART_SEPARATOR).collect();
                if parts.len() != columns.len() {
                    return Err(QueryError::malformed(format!(
                        "entity key '{}' has {} part(s), '{}' expects {}",
                        key,
                        parts.len(),
                        self.table.name,
                        columns.len()
                    )));
                }
                parts
                    .iter()
                    .zip(&columns)
                    .map(|(part, col)| col.field_type.coerce(&Value::String(part.to_string())))
                    .collect()
            })
            .collect()
    }

    /// Expand an entity key path segment into the predicate selecting those rows
    pub fn key_predicate(&self, entity_key: &str) -> Result<Predicate> {
        let keys = self.parse_entity_key(entity_key)?;
        if keys.is_empty() {
            return Err(QueryError::malformed("empty entity key"));
        }

        if self.key.len() == 1 {
            let attribute = self.key[0].clone();
            let mut values: Vec<Value> = keys.into_iter().flatten().collect();
            return Ok(if values.len() == 1 {
                Predicate::compare(Operator::Eq, attribute, values.remove(0))
            } else {
                Predicate::compare_many(Operator::In, attribute, values)
            });
        }

        let mut per_key: Vec<Predicate> = keys
            .into_iter()
            .map(|values| {
                Predicate::And(
                    self.key
                        .iter()
                        .zip(values)
                        .map(|(attr, v)| Predicate::compare(Operator::Eq, attr.clone(), v))
                        .collect(),
                )
            })
            .collect();

        Ok(if per_key.len() == 1 {
            per_key.remove(0)
        } else {
            Predicate::Or(per_key)
        })
    }
}

fn insert_nested(target: &mut DataRow, name: &str, value: Value) {
    match name.split_once('.') {
        None => {
            target.insert(name.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(DataRow::new()));
            if !slot.is_object() {
                *slot = Value::Object(DataRow::new());
            }
            if let Value::Object(inner) = slot {
                insert_nested(inner, rest, value);
            }
        }
    }
}

fn flatten_into(out: &mut DataRow, prefix: &str, body: &DataRow, entity: &Entity) {
    for (key, value) in body {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            // Embedded objects are only flattened when they are not themselves an attribute
            Value::Object(inner) if entity.attribute(&name).is_none() => {
                flatten_into(out, &name, inner, entity)
            }
            _ => {
                out.insert(name, value.clone());
            }
        }
    }
}

/// A REST collection backed by one entity
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub entity: Entity,
}

impl Collection {
    pub fn new(name: impl Into<String>, entity: Entity) -> Self {
        Self {
            name: name.into(),
            entity,
        }
    }

    /// Name of the backend this collection's table lives in
    pub fn backend(&self) -> &str {
        &self.entity.table().backend
    }
}

/// Immutable set of collections shared across all requests
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    collections: Vec<Arc<Collection>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.collections.push(Arc::new(collection));
        self
    }

    /// Merge another catalog in; later collections do not shadow earlier ones
    pub fn extend(&mut self, other: Catalog) -> Result<()> {
        for collection in other.collections {
            if self.collection(&collection.name).is_some() {
                return Err(QueryError::InvalidConfiguration(format!(
                    "collection '{}' is defined twice",
                    collection.name
                )));
            }
            self.collections.push(collection);
        }
        Ok(())
    }

    /// Case-insensitive collection lookup
    pub fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn collections(&self) -> impl Iterator<Item = &Arc<Collection>> {
        self.collections.iter()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orders_table() -> Table {
        Table::new("orders_tbl", "dynamo")
            .with_column("hk", FieldType::Int64)
            .with_column("sk", FieldType::String)
            .with_column("ls1", FieldType::String)
            .with_index(Index::primary("hk", Some("sk")))
            .with_index(Index::local_secondary("ls1", "hk", "ls1"))
    }

    fn orders() -> Entity {
        Entity::from_parts(
            orders_table(),
            vec![
                Attribute { name: "orderId".into(), column: "hk".into() },
                Attribute { name: "type".into(), column: "sk".into() },
                Attribute { name: "ship.city".into(), column: "ls1".into() },
            ],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_default_key_follows_primary_index() {
        let entity = orders();
        assert_eq!(entity.key(), &["orderId".to_string(), "type".to_string()]);
        assert_eq!(entity.column_for("ORDERID").unwrap().name, "hk");
        assert!(entity.column_for("customer").is_err());
    }

    #[test]
    fn test_local_secondary_must_share_hash() {
        let table = Table::new("t", "dynamo")
            .with_column("a", FieldType::String)
            .with_column("b", FieldType::String)
            .with_index(Index::primary("a", None))
            .with_index(Index::local_secondary("bad", "b", "a"));
        assert!(matches!(
            table.validate(),
            Err(QueryError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_project_row_renames_and_nests() {
        let mut raw = DataRow::new();
        raw.insert("hk".into(), json!(11058));
        raw.insert("ls1".into(), json!("Mannheim"));

        let projected = orders().project_row(&raw);
        assert_eq!(
            Value::Object(projected),
            json!({"orderId": 11058, "ship": {"city": "Mannheim"}})
        );
    }

    #[test]
    fn test_to_physical_row_flattens_nested_attributes() {
        let body = json!({"orderId": "7", "ship": {"city": "Atlanta"}});
        let physical = orders()
            .to_physical_row(body.as_object().unwrap())
            .unwrap();
        assert_eq!(physical.get("hk"), Some(&json!(7)));
        assert_eq!(physical.get("ls1"), Some(&json!("Atlanta")));

        let bad = json!({"nope": 1});
        assert!(matches!(
            orders().to_physical_row(bad.as_object().unwrap()),
            Err(QueryError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_composite_key_predicate() {
        let entity = orders();
        let predicate = entity.key_predicate("11058~ORDER").unwrap();
        assert_eq!(predicate.to_string(), "and(eq(orderId,11058),eq(type,ORDER))");

        let predicate = entity.key_predicate("1~A,2~B").unwrap();
        assert_eq!(
            predicate.to_string(),
            "or(and(eq(orderId,1),eq(type,A)),and(eq(orderId,2),eq(type,B)))"
        );

        assert!(entity.key_predicate("11058").is_err());
    }

    #[test]
    fn test_single_key_list_becomes_in() {
        let table = Table::new("orders", "sql")
            .with_column("orderid", FieldType::Int64)
            .with_index(Index::primary("orderid", None));
        let entity = Entity::new(table).unwrap();
        let predicate = entity.key_predicate("10273,10274").unwrap();
        assert_eq!(predicate.to_string(), "in(orderid,10273,10274)");
        assert_eq!(Entity::encode_key(&[json!(11058), json!("ORDER")]), "11058~ORDER");
    }

    #[test]
    fn test_catalog_lookup_is_case_insensitive() {
        let catalog = Catalog::new().with_collection(Collection::new("Orders", orders()));
        assert!(catalog.collection("orders").is_some());
        assert!(catalog.collection("customers").is_none());

        let mut merged = Catalog::new().with_collection(Collection::new("orders", orders()));
        assert!(merged.extend(catalog).is_err());
    }
}
