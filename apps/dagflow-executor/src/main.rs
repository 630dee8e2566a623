//! Thin binary entry point: parse the CLI, wire up the process, dispatch.
//! Everything else lives in `dagflow_executor`'s library crate so it stays
//! directly testable.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dagflow_executor::functions::{seed_builtins, BuiltinLoader};
use dagflow_executor::{encode_call_args, parse_cli_args, read_call_result, Cli, Commands, ExecutorApp, ExecutorConfig};
use dagflow_kvs_memory::InMemoryKvs;
use dagflow_types::FunctionCall;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&cli.log_level)).with_target(false).init();

    if cli.kvs != "memory" {
        anyhow::bail!("unsupported --kvs backend '{}': only 'memory' is implemented", cli.kvs);
    }

    let kvs = InMemoryKvs::new();
    seed_builtins(&kvs);

    let config = ExecutorConfig {
        bind_addr: cli.bind,
        scheduler_continuation_addr: cli.scheduler_continuation_addr,
        ..ExecutorConfig::default()
    };
    let mesh = dagflow_bus::InMemoryMesh::new();
    let app = ExecutorApp::new(config, mesh, kvs, Arc::new(BuiltinLoader));

    match cli.command {
        Commands::Serve => app.serve().await?,
        Commands::SubmitCall { name, args, response_key, consistency } => {
            run_submit_call(app, name, args, response_key, consistency.into()).await?
        }
    }

    Ok(())
}

async fn run_submit_call(
    mut app: ExecutorApp,
    name: String,
    raw_args: Vec<String>,
    response_key: String,
    consistency: dagflow_types::Consistency,
) -> Result<()> {
    let values = parse_cli_args(&raw_args);
    let call = FunctionCall { name, arguments: encode_call_args(&values)?, response_key: response_key.clone(), consistency };

    app.submit_call(call).await?;

    match read_call_result(app.kvs(), &response_key, consistency).await? {
        Some(value) => println!("{value:?}"),
        None => println!("no result written to '{response_key}'"),
    }
    Ok(())
}
