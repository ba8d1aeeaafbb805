//! rowgate CLI
//!
//! Loads the gateway configuration and serves or explains single requests.

mod catalog;
mod commands;
mod settings;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{ExplainCommand, RunCommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "ROWGATE_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "ROWGATE_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(
        short,
        long,
        default_value = "rowgate.toml",
        env = "ROWGATE_CONFIG",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the access plan for a request
    Explain(ExplainCommand),
    /// Serve one request and print the response
    Run(RunCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes full control when set
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .context("Invalid RUST_LOG environment variable")?
    } else {
        tracing_subscriber::EnvFilter::try_new(format!(
            "rowgate_cli={level},\
             rowgate_query={level},\
             rowgate_query_sql={level},\
             rowgate_query_dynamo={level},\
             rowgate_query_elastic={level},\
             rowgate_chain={level},\
             rowgate_cache={level},\
             tokio_postgres=warn,\
             aws_config=warn,\
             aws_smithy_runtime=warn,\
             hyper=warn,\
             reqwest=warn,\
             redis=warn",
            level = cli.log_level
        ))
        .with_context(|| format!("Invalid log level '{}'", cli.log_level))?
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    match cli.command {
        Commands::Explain(cmd) => cmd.execute(cli.config),
        Commands::Run(cmd) => cmd.execute(cli.config),
    }
}
