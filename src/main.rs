/// diagrun: execution engine for node/arrow workflow diagrams
///
/// Command line entry point. Serves the HTTP API, runs a diagram file once and
/// prints its result, or prints the static execution plan of a diagram.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use diagrun::config::Config;
use diagrun::diagram::Diagram;
use diagrun::executors::ExecutorRegistry;
use diagrun::runtime::{planner, ExecutionEngine, ExecutionOptions, GraphIndex, TracingSink};
use diagrun::server::start_server;

#[derive(Parser)]
#[command(name = "diagrun", version, about = "Run node/arrow workflow diagrams")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a diagram file once and print the result as JSON
    Run {
        /// Diagram JSON file
        file: PathBuf,
        /// Record node failures and keep going
        #[arg(long)]
        debug: bool,
        /// Loop limit for cyclic nodes
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Wall-clock budget for the whole run
        #[arg(long)]
        timeout_secs: Option<f64>,
        /// Run variable as key=value; values parse as JSON, falling back to a string
        #[arg(long = "var", value_parser = parse_key_value)]
        vars: Vec<(String, Value)>,
        /// Node id to skip (repeatable)
        #[arg(long = "skip")]
        skip_nodes: Vec<String>,
        /// Canned answer for a user_response node as node_id=value
        #[arg(long = "respond", value_parser = parse_key_value)]
        responses: Vec<(String, Value)>,
    },
    /// Print the static execution plan of a diagram file
    Plan {
        /// Diagram JSON file
        file: PathBuf,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("diagrun=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = Config::default();

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            start_server(config).await?;
        }
        Commands::Run {
            file,
            debug,
            max_iterations,
            timeout_secs,
            vars,
            skip_nodes,
            responses,
        } => {
            let diagram = Diagram::load(&file).await?;

            let mut options = ExecutionOptions::from_config(&config.execution);
            options.debug_mode |= debug;
            if let Some(max_iterations) = max_iterations {
                options.max_iterations = max_iterations;
            }
            if let Some(secs) = timeout_secs {
                options.timeout = std::time::Duration::try_from_secs_f64(secs)
                    .context("--timeout-secs must be a non-negative number")?;
            }
            options.variables.extend(vars);
            options.skip_nodes = skip_nodes;
            options.user_responses.extend(responses);

            let registry = Arc::new(ExecutorRegistry::from_config(&config));
            let engine = ExecutionEngine::new(registry).with_sink(Arc::new(TracingSink));

            // Ctrl-C aborts the run but still prints the partial result
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("🛑 Interrupted, aborting execution");
                    on_signal.cancel();
                }
            });

            let result = engine.execute_with_cancel(&diagram, options, cancel).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Plan { file } => {
            let diagram = Diagram::load(&file).await?;
            let plan = planner::plan(Arc::new(GraphIndex::build(&diagram)));
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_values_parse_json_or_fall_back_to_strings() {
        assert_eq!(parse_key_value("n=3").unwrap(), ("n".to_string(), serde_json::json!(3)));
        assert_eq!(
            parse_key_value("topic=tabs vs spaces").unwrap(),
            ("topic".to_string(), Value::String("tabs vs spaces".into()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=1").is_err());
    }
}
