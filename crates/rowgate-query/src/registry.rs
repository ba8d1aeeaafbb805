use crate::error::{QueryError, Result};
use crate::plan::SqlDialect;
use crate::traits::DataSource;
use crate::types::BackendKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// How to reach one backend
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Name collections use to reference this backend
    pub name: String,
    pub kind: BackendKind,
    #[serde(default)]
    pub dialect: SqlDialect,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Username; the access key id for DynamoDB
    #[serde(default)]
    pub username: Option<String>,
    /// Password; the secret access key for DynamoDB
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    /// Cloud region for managed backends
    #[serde(default)]
    pub region: Option<String>,
    /// Full endpoint URL override
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Backend-specific extras such as `reflect_schema`
    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            dialect: SqlDialect::default(),
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            region: None,
            endpoint: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            options: HashMap::new(),
        }
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Where this backend points, for logs; never includes the password
    pub fn connection_string(&self) -> String {
        let user = self
            .username
            .as_deref()
            .map(|u| format!("{}@", u))
            .unwrap_or_default();
        let target = match (&self.endpoint, &self.host, &self.region) {
            (Some(endpoint), _, _) => endpoint.clone(),
            (None, Some(host), _) => match self.port {
                Some(port) => format!("{}:{}", host, port),
                None => host.clone(),
            },
            (None, None, Some(region)) => region.clone(),
            (None, None, None) => String::new(),
        };
        let database = self
            .database
            .as_deref()
            .map(|db| format!("/{}", db))
            .unwrap_or_default();

        format!("{}://{}{}{}", self.kind, user, target, database)
    }
}

/// Builds the sources of one backend kind
#[async_trait]
pub trait DataSourceFactory: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn create_source(&self, config: ConnectionConfig) -> Result<Arc<dyn DataSource>>;
}

/// Registry for data sources and the factories that build them
pub struct SourceRegistry {
    factories: Arc<RwLock<HashMap<BackendKind, Arc<dyn DataSourceFactory>>>>,
    sources: Arc<RwLock<HashMap<String, Arc<dyn DataSource>>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
            sources: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a factory for a backend kind
    pub async fn register_factory(&self, factory: Arc<dyn DataSourceFactory>) {
        let kind = factory.kind();
        let mut factories = self.factories.write().await;

        if factories.contains_key(&kind) {
            warn!("Overwriting existing factory for backend kind: {}", kind);
        }

        factories.insert(kind, factory);
        debug!("Registered factory for backend kind: {}", kind);
    }

    /// Create a data source through its factory and keep it under its name
    pub async fn create_source(&self, config: ConnectionConfig) -> Result<Arc<dyn DataSource>> {
        let factory = self
            .factories
            .read()
            .await
            .get(&config.kind)
            .cloned()
            .ok_or_else(|| {
                QueryError::InvalidConfiguration(format!(
                    "No factory registered for backend kind: {}",
                    config.kind
                ))
            })?;

        debug!(
            "Creating source {} ({})",
            config.name,
            config.connection_string()
        );

        let source = factory.create_source(config).await?;
        self.register_source(source.clone()).await;
        Ok(source)
    }

    /// Add an already constructed source
    pub async fn register_source(&self, source: Arc<dyn DataSource>) {
        let mut sources = self.sources.write().await;
        if sources
            .insert(source.name().to_string(), source.clone())
            .is_some()
        {
            warn!("Replaced existing source: {}", source.name());
        }
    }

    pub async fn get_source(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        self.sources.read().await.get(name).cloned()
    }

    /// Remove a source and close it
    pub async fn remove_source(&self, name: &str) -> Result<()> {
        let removed = self.sources.write().await.remove(name);

        if let Some(source) = removed {
            debug!("Closing source: {}", name);
            source.close().await?;
        }

        Ok(())
    }

    pub async fn list_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close and drop every source
    pub async fn clear_sources(&self) {
        let drained: Vec<_> = self.sources.write().await.drain().collect();

        for (name, source) in drained {
            if let Err(e) = source.close().await {
                warn!("Failed to close source {}: {}", name, e);
            }
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
