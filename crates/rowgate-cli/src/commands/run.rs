use super::{build_gateway, parse_method};
use anyhow::Context;
use clap::Args;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

/// Serve one request against the configured backends and print the response
#[derive(Args)]
pub struct RunCommand {
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Request URL, absolute or relative to the base URL
    pub url: String,

    /// JSON request body
    #[arg(short, long, conflicts_with = "body_file")]
    pub body: Option<String>,

    /// Read the JSON request body from a file
    #[arg(long)]
    pub body_file: Option<PathBuf>,

    /// Also print the plans that were executed
    #[arg(long)]
    pub explain: bool,
}

impl RunCommand {
    fn body(&self) -> anyhow::Result<Option<Value>> {
        let raw = match (&self.body, &self.body_file) {
            (Some(body), _) => body.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            (None, None) => return Ok(None),
        };
        let body = serde_json::from_str(&raw).context("Request body is not valid JSON")?;
        Ok(Some(body))
    }

    pub fn execute(self, config: PathBuf) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run(config))
    }

    async fn run(self, config: PathBuf) -> anyhow::Result<()> {
        let method = parse_method(&self.method)?;
        let body = self.body()?;
        let gateway = build_gateway(&config, false).await?;
        let res = gateway.service(method, &self.url, body).await;

        if self.explain {
            for plan in &res.plans {
                println!("# {}", plan);
            }
        }
        println!("{}", res.status);
        for (name, value) in &res.headers {
            println!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
        }
        if let Some(body) = &res.body {
            println!("{}", serde_json::to_string_pretty(body)?);
        }
        debug!("{} change(s)", res.changes.len());

        for name in gateway.sources().list_sources().await {
            if let Some(source) = gateway.sources().get_source(&name).await {
                source.close().await?;
            }
        }

        if !res.is_success() {
            anyhow::bail!("request failed with status {}", res.status);
        }
        Ok(())
    }
}
