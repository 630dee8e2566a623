//! Command-line surface: `Cli` as the root parser, a flat `Commands` enum,
//! structs exposed so tests can construct commands without going through
//! `argv`.

use clap::{Parser, Subcommand, ValueEnum};
use dagflow_types::Consistency;

/// Root CLI parser for the dagflow executor process.
#[derive(Parser, Debug)]
#[command(name = "dagflow-executor", version, about = "Local DAG step executor over an in-memory trigger mesh")]
pub struct Cli {
    /// KVS backend to use. Only `memory` is implemented; the flag is left in
    /// place for when a real backend lands.
    #[arg(long, default_value = "memory")]
    pub kvs: String,

    /// This process's own inbound trigger/schedule address.
    #[arg(long, default_value = "local-executor")]
    pub bind: String,

    /// Address the scheduler's continuation and metrics endpoint listens on.
    #[arg(long, default_value = "scheduler-continuation")]
    pub scheduler_continuation_addr: String,

    /// Log verbosity passed to `tracing_subscriber`'s `EnvFilter`.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level executor subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the main trigger/schedule/call pull loop.
    Serve,
    /// Construct and execute a one-shot `FunctionCall` locally, for smoke
    /// testing a built-in function without standing up a full DAG.
    SubmitCall {
        /// Name of a built-in function (see `dagflow_executor::functions`).
        name: String,
        /// Positional arguments, each parsed as an integer, then a
        /// boolean, falling back to a string.
        #[arg(long = "arg")]
        args: Vec<String>,
        /// KVS key the result (or error) is written to.
        #[arg(long, default_value = "submit-call-result")]
        response_key: String,
        /// Consistency mode to execute under.
        #[arg(long, value_enum, default_value = "normal")]
        consistency: CliConsistency,
    },
}

/// CLI-facing mirror of [`Consistency`] (clap's `ValueEnum` can't be derived
/// on a type defined in another crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliConsistency {
    /// Last-writer-wins / lattice-merge semantics.
    Normal,
    /// Transactional causal snapshot semantics.
    Multi,
}

impl From<CliConsistency> for Consistency {
    fn from(value: CliConsistency) -> Self {
        match value {
            CliConsistency::Normal => Consistency::Normal,
            CliConsistency::Multi => Consistency::Multi,
        }
    }
}
