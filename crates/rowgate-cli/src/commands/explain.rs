use super::{build_gateway, parse_method};
use clap::Args;
use std::path::PathBuf;

/// Print the access plan for a request without touching any backend
#[derive(Args)]
pub struct ExplainCommand {
    /// GET shows the select, DELETE the key selection feeding the delete
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Request URL, absolute or relative to the base URL
    pub url: String,
}

impl ExplainCommand {
    pub fn execute(self, config: PathBuf) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.explain(config))
    }

    async fn explain(self, config: PathBuf) -> anyhow::Result<()> {
        let method = parse_method(&self.method)?;
        let gateway = build_gateway(&config, true).await?;
        let plan = gateway.explain(method, &self.url).await?;
        println!("{}", plan);
        Ok(())
    }
}
