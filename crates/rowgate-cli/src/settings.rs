//! Configuration file and environment overrides

use anyhow::Context;
use config::{Config, Environment, File};
use rowgate_cache::CacheConfig;
use rowgate_chain::{DeletePolicy, GatewayConfig, DEFAULT_MAX_INCLUDE_DEPTH};
use rowgate_query::{Attribute, ConnectionConfig, Table};
use serde::Deserialize;
use std::path::Path;

const ENV_PREFIX: &str = "ROWGATE";
const ENV_SEPARATOR: &str = "__";

/// One statically declared collection
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSettings {
    pub name: String,
    pub table: Table,
    /// Public names for columns; unlisted columns keep their own name
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Key attribute names; defaults to the primary index
    #[serde(default)]
    pub key: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub backends: Vec<ConnectionConfig>,
    #[serde(default)]
    pub collections: Vec<CollectionSettings>,
    #[serde(default)]
    pub delete: DeletePolicy,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default = "default_max_include_depth")]
    pub max_include_depth: usize,
}

fn default_base_url() -> String {
    GatewayConfig::default().base_url
}

fn default_max_include_depth() -> usize {
    DEFAULT_MAX_INCLUDE_DEPTH
}

impl Settings {
    /// Load the file at `path` (format from its extension), then apply
    /// `ROWGATE__*` environment overrides such as `ROWGATE__BASE_URL`
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::default()
            .with_base_url(self.base_url.clone())
            .with_delete_policy(self.delete.clone())
            .with_max_include_depth(self.max_include_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgate_query::{BackendKind, FieldType, IndexKind, SqlDialect};
    use std::io::Write;

    fn write_config(extension: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_toml() {
        let file = write_config(
            ".toml",
            r#"
base_url = "http://api.local/northwind"

[[backends]]
name = "northwind"
kind = "sql"
dialect = "mysql"
host = "db.local"
port = 3306

[[backends]]
name = "events"
kind = "dynamo"
region = "eu-west-1"

[[collections]]
name = "orders"
key = ["id"]

[collections.table]
name = "orders"
backend = "northwind"
columns = [
    { name = "orderid", type = "int64" },
    { name = "shipcity" },
]
indexes = [{ name = "Primary Index", kind = "primary", hash_key = "orderid" }]

[[collections.attributes]]
name = "id"
column = "orderid"

[delete]
deny = ["orders"]

[cache]
host = "cache.local"
ttl_secs = 60
"#,
        );

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.base_url, "http://api.local/northwind");
        assert_eq!(settings.max_include_depth, 8);

        assert_eq!(settings.backends.len(), 2);
        assert_eq!(settings.backends[0].kind, BackendKind::Sql);
        assert_eq!(settings.backends[0].dialect, SqlDialect::MySql);
        assert_eq!(settings.backends[0].port, Some(3306));
        assert_eq!(settings.backends[1].region.as_deref(), Some("eu-west-1"));

        let orders = &settings.collections[0];
        assert_eq!(orders.key, vec!["id"]);
        assert_eq!(orders.table.columns[0].field_type, FieldType::Int64);
        assert_eq!(orders.table.columns[1].field_type, FieldType::String);
        assert_eq!(orders.table.indexes[0].kind, IndexKind::Primary);
        assert_eq!(orders.attributes[0].column, "orderid");

        assert!(!settings.delete.permits("orders"));
        let cache = settings.cache.unwrap();
        assert_eq!(cache.port, 6379);
        assert_eq!(cache.ttl_secs, 60);
    }

    #[test]
    fn test_defaults_for_an_empty_document() {
        let file = write_config(".json", "{}");
        let settings = Settings::load(file.path()).unwrap();

        assert_eq!(settings.base_url, "http://localhost");
        assert!(settings.backends.is_empty());
        assert!(settings.cache.is_none());
        assert!(settings.delete.allow_batch);
        assert_eq!(settings.gateway_config().max_include_depth, 8);
    }

    #[test]
    fn test_missing_file() {
        let err = Settings::load(Path::new("/nonexistent/rowgate.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rowgate.toml"));
    }
}
