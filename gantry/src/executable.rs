//! Main entry point for CLI command to start server.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use apollo_compiler::Schema;
use clap::Parser;
use clap::ValueEnum;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::axum_factory::make_router;
use crate::axum_factory::serve;
use crate::configuration::Configuration;
use crate::configuration::generate_config_schema;
use crate::context::ContextFactory;
use crate::engine::Engine;
use crate::engine::ResolverEngine;
use crate::engine::SchemaFactory;
use crate::json_ext::Value;
use crate::plugin::Plugin;
use crate::services::RouterService;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Options for the server
#[derive(Parser, Debug)]
#[command(name = "gantry", about = "GraphQL over HTTP server", version)]
pub(crate) struct Opt {
    /// Log level (off|error|warn|info|debug|trace), or any filter directive.
    #[arg(
        long = "log",
        default_value = "info",
        alias = "log-level",
        env = "GANTRY_LOG"
    )]
    log_level: String,

    /// Log output format.
    #[arg(
        long = "log-format",
        value_enum,
        default_value_t = LogFormat::Text,
        env = "GANTRY_LOG_FORMAT"
    )]
    log_format: LogFormat,

    /// Configuration file, in YAML.
    #[arg(short, long = "config", env = "GANTRY_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Schema to serve, in SDL.
    #[arg(short, long = "schema", env = "GANTRY_SCHEMA_PATH")]
    schema_path: Option<PathBuf>,

    /// Root value of every operation, in JSON or YAML.
    #[arg(long = "root-value", env = "GANTRY_ROOT_VALUE_PATH")]
    root_value_path: Option<PathBuf>,

    /// Prints the configuration schema.
    #[arg(long = "config-schema")]
    config_schema: bool,
}

/// This is the main server entrypoint.
pub fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(Executable::builder().start())
}

/// Entry point into creating a server executable.
pub struct Executable {}

#[buildstructor::buildstructor]
impl Executable {
    /// Parse command line options, set up logging and serve the schema until interrupted.
    ///
    /// Schema factories, context factories and plugins are only available when embedding
    /// the server.
    #[builder(entry = "builder", exit = "start", visibility = "pub")]
    async fn start(
        schema_factory: Option<Arc<dyn SchemaFactory>>,
        context_factory: Option<Arc<dyn ContextFactory>>,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<()> {
        let opt = Opt::parse();

        if opt.config_schema {
            let schema = generate_config_schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            return Ok(());
        }

        init_logging(&opt)?;

        let configuration = match &opt.config_path {
            Some(path) => read(path)?
                .parse::<Configuration>()
                .with_context(|| format!("invalid configuration in {}", path.display()))?,
            None => Configuration::default(),
        };

        let schema_path = opt
            .schema_path
            .as_deref()
            .ok_or_else(|| anyhow!("a schema must be given with --schema"))?;
        let schema = Schema::parse_and_validate(read(schema_path)?, schema_path)
            .map_err(|invalid| anyhow!("invalid schema:\n{}", invalid.errors))?;
        let root_value = match &opt.root_value_path {
            Some(path) => serde_yaml::from_str::<Value>(&read(path)?)
                .with_context(|| format!("invalid root value in {}", path.display()))?,
            None => Value::Object(Default::default()),
        };
        let engine: Arc<dyn Engine> =
            Arc::new(ResolverEngine::new(Arc::new(schema)).with_root_value(root_value));

        let service = RouterService::builder()
            .engine(engine)
            .configuration(Arc::new(configuration.clone()))
            .and_schema_factory(schema_factory)
            .and_context_factory(context_factory)
            .plugins(plugins)
            .build();

        let listener = TcpListener::bind(configuration.server().listen())
            .await
            .with_context(|| format!("could not listen on {}", configuration.server().listen()))?;
        let router = make_router(service.clone(), &configuration);
        let shutdown = async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "could not listen for the shutdown signal");
            }
            tracing::info!("shutting down");
            service.shutdown();
        };
        serve(listener, router, shutdown).await?;
        Ok(())
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))
}

fn init_logging(opt: &Opt) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_new(&opt.log_level).context("could not parse log configuration")?,
    );
    match opt.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow!("could not install the log subscriber: {error}"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_line_is_consistent() {
        Opt::command().debug_assert();
    }

    #[test]
    fn options_are_parsed() {
        let opt = Opt::try_parse_from([
            "gantry",
            "--schema",
            "schema.graphql",
            "--log",
            "gantry=debug",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(opt.schema_path, Some(PathBuf::from("schema.graphql")));
        assert_eq!(opt.log_level, "gantry=debug");
        assert_eq!(opt.log_format, LogFormat::Json);
        assert!(!opt.config_schema);
    }
}
