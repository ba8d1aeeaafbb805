//! Catalog assembly from configuration and live backends

use crate::settings::{CollectionSettings, Settings};
use anyhow::Context;
use async_trait::async_trait;
use rowgate_query::{
    BackendKind, Catalog, CatalogReflector, Collection, Entity, Result, SourceRegistry,
};
use rowgate_query_dynamo::DynamoSourceFactory;
use rowgate_query_elastic::ElasticSourceFactory;
use rowgate_query_sql::{PostgresExecutor, PostgresReflector, SqlSource, SqlSourceFactory};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backend option naming the schema to reflect collections from
pub const REFLECT_SCHEMA_OPTION: &str = "reflect_schema";

/// Collections declared in the configuration file
pub struct StaticReflector {
    collections: Vec<CollectionSettings>,
}

impl StaticReflector {
    pub fn new(collections: Vec<CollectionSettings>) -> Self {
        Self { collections }
    }
}

#[async_trait]
impl CatalogReflector for StaticReflector {
    async fn reflect(&self, backend: &str) -> Result<Vec<Collection>> {
        self.collections
            .iter()
            .filter(|c| c.table.backend == backend)
            .map(|c| {
                let entity =
                    Entity::from_parts(c.table.clone(), c.attributes.clone(), c.key.clone())?;
                Ok(Collection::new(c.name.clone(), entity))
            })
            .collect()
    }
}

/// Register the factories for every backend kind
pub async fn register_factories(sources: &SourceRegistry, detached: bool) {
    if detached {
        sources.register_factory(Arc::new(SqlSourceFactory::detached())).await;
        sources.register_factory(Arc::new(DynamoSourceFactory::detached())).await;
        sources.register_factory(Arc::new(ElasticSourceFactory::detached())).await;
    } else {
        sources.register_factory(Arc::new(SqlSourceFactory::new())).await;
        sources.register_factory(Arc::new(DynamoSourceFactory::new())).await;
        sources.register_factory(Arc::new(ElasticSourceFactory::new())).await;
    }
}

/// Create every configured source and the catalog over them.
///
/// Postgres backends with a `reflect_schema` option contribute the tables of
/// that schema, unless `detached` is set; all backends contribute their
/// statically declared collections.
pub async fn load(settings: &Settings, sources: &SourceRegistry, detached: bool) -> anyhow::Result<Catalog> {
    register_factories(sources, detached).await;

    let reflector = StaticReflector::new(settings.collections.clone());
    let mut catalog = Catalog::new();

    for backend in &settings.backends {
        let schema = backend.options.get(REFLECT_SCHEMA_OPTION);

        let reflected = match schema {
            Some(schema) if backend.kind == BackendKind::Sql && !detached => {
                let executor = Arc::new(
                    PostgresExecutor::connect(backend)
                        .await
                        .with_context(|| format!("Failed to connect backend '{}'", backend.name))?,
                );
                let collections = PostgresReflector::new(executor.clone(), schema.as_str())
                    .reflect(&backend.name)
                    .await
                    .with_context(|| format!("Failed to reflect backend '{}'", backend.name))?;
                sources
                    .register_source(Arc::new(SqlSource::new(
                        backend.name.clone(),
                        backend.dialect,
                        executor,
                    )))
                    .await;
                collections
            }
            _ => {
                if schema.is_some() {
                    warn!(
                        "Backend '{}' is not reflected; only declared collections are served",
                        backend.name
                    );
                }
                sources
                    .create_source(backend.clone())
                    .await
                    .with_context(|| format!("Failed to create backend '{}'", backend.name))?;
                Vec::new()
            }
        };

        let mut declared = reflector.reflect(&backend.name).await?;
        debug!(
            "Backend '{}': {} reflected, {} declared collections",
            backend.name,
            reflected.len(),
            declared.len()
        );

        // Declared collections replace reflected ones of the same name
        let mut collections: Vec<Collection> = reflected
            .into_iter()
            .filter(|r| !declared.iter().any(|d| d.name.eq_ignore_ascii_case(&r.name)))
            .collect();
        collections.append(&mut declared);

        let backend_catalog = collections
            .into_iter()
            .fold(Catalog::new(), Catalog::with_collection);
        catalog.extend(backend_catalog)?;
    }

    for orphan in settings
        .collections
        .iter()
        .filter(|c| !settings.backends.iter().any(|b| b.name == c.table.backend))
    {
        warn!(
            "Collection '{}' references unknown backend '{}'",
            orphan.name, orphan.table.backend
        );
    }

    info!(
        "Loaded {} collections from {} backends",
        catalog.len(),
        settings.backends.len()
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgate_query::{Attribute, ConnectionConfig, FieldType, Index, Table};

    fn settings() -> Settings {
        let orders = CollectionSettings {
            name: "orders".to_string(),
            table: Table::new("orders", "northwind")
                .with_column("orderid", FieldType::Int64)
                .with_column("shipcity", FieldType::String)
                .with_index(Index::primary("orderid", None)),
            attributes: vec![Attribute {
                name: "id".to_string(),
                column: "orderid".to_string(),
            }],
            key: vec!["id".to_string()],
        };
        let events = CollectionSettings {
            name: "events".to_string(),
            table: Table::new("events", "events")
                .with_column("hk", FieldType::String)
                .with_column("sk", FieldType::String)
                .with_index(Index::primary("hk", Some("sk"))),
            attributes: Vec::new(),
            key: Vec::new(),
        };

        Settings {
            base_url: "http://localhost/api".to_string(),
            backends: vec![
                ConnectionConfig::new("northwind", BackendKind::Sql),
                ConnectionConfig::new("events", BackendKind::Dynamo),
            ],
            collections: vec![orders, events],
            delete: Default::default(),
            cache: None,
            max_include_depth: 8,
        }
    }

    #[tokio::test]
    async fn test_static_reflector_filters_by_backend() {
        let reflector = StaticReflector::new(settings().collections);

        let northwind = reflector.reflect("northwind").await.unwrap();
        assert_eq!(northwind.len(), 1);
        assert_eq!(northwind[0].entity.key(), ["id".to_string()]);

        let events = reflector.reflect("events").await.unwrap();
        assert_eq!(events[0].entity.key().len(), 2);

        assert!(reflector.reflect("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detached_load_registers_every_backend() {
        let sources = SourceRegistry::new();
        let catalog = load(&settings(), &sources, true).await.unwrap();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.collection("ORDERS").is_some());

        let mut names = sources.list_sources().await;
        names.sort();
        assert_eq!(names, vec!["events", "northwind"]);
    }
}
