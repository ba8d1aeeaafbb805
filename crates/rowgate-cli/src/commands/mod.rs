pub mod explain;
pub mod run;

pub use explain::ExplainCommand;
pub use run::RunCommand;

use crate::catalog;
use crate::settings::Settings;
use anyhow::Context;
use http::Method;
use rowgate_cache::CacheHandler;
use rowgate_chain::Gateway;
use rowgate_query::SourceRegistry;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Build the gateway described by the configuration file.
///
/// `detached` sources plan but never connect, which is all `explain` needs.
pub async fn build_gateway(config: &Path, detached: bool) -> anyhow::Result<Gateway> {
    let settings = Settings::load(config)?;
    let sources = SourceRegistry::new();
    let catalog = catalog::load(&settings, &sources, detached).await?;

    let mut gateway = Gateway::new(settings.gateway_config(), catalog, sources)
        .context("Invalid gateway configuration")?;

    if let Some(cache) = settings.cache.filter(|_| !detached) {
        debug!("Caching GET responses in {}", cache.destination());
        gateway = gateway.with_handler(Arc::new(CacheHandler::redis(cache)));
    }

    Ok(gateway)
}

pub fn parse_method(method: &str) -> anyhow::Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("delete").unwrap(), Method::DELETE);
        assert_eq!(parse_method("GET").unwrap(), Method::GET);
        assert!(parse_method("not a method").is_err());
    }
}
