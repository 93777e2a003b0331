// Parallel workers CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Logs go to stderr; stdout of the hidden `unit` command
// carries the unit protocol.
// Design Decision: Process units re-run this binary with `unit`.

mod commands;
mod output;
mod tasks;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use parallel_workers::bootstrap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "parallel-workers")]
#[command(about = "Run tasks on a bounded pool of isolated workers")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sum the rows of a random byte matrix, in parallel and sequentially
    Bench(commands::bench::BenchArgs),

    /// Run a single built-in task (identity, row_sum, sleep, spin, fail) on a pool
    Run(commands::run::RunArgs),

    /// Serve tasks over stdio (entry point of process units)
    #[command(hide = true)]
    Unit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parallel_workers=warn,parallel_workers_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Bench(args) => commands::bench::run(args, output_format).await,
        Commands::Run(args) => commands::run::run(args, output_format).await,
        Commands::Unit => {
            if !bootstrap::is_unit_process() {
                tracing::warn!("`unit` is meant to be started by a worker pool");
            }
            bootstrap::serve_stdio(Arc::new(tasks::registry())).await?;
            Ok(())
        }
    }
}
