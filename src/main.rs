//! TEMPLAR - Template Management Engine
//!
//! Binary entry point: argument parsing, logging setup, and dispatch to
//! the command layer. Exit codes: `0` success, `1` failure, `2`
//! resolution conflicts.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use templar::commands::{self, BenchOperation, OutputFormat};
use templar::config::Config;
use templar::registry::TemplateRegistry;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "templar", version, about = "Template management engine")]
struct Cli {
    /// Directory scanned for template manifests.
    #[arg(long, default_value = ".")]
    templates_dir: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Time engine operations over synthetic templates.
    Benchmark {
        /// Synthetic templates to build.
        #[arg(long, default_value_t = 10)]
        templates: usize,
        /// Operations to time.
        #[arg(long, value_delimiter = ',', default_values_t = [
            BenchOperation::Load,
            BenchOperation::Validate,
            BenchOperation::Search,
            BenchOperation::Generate,
        ])]
        operations: Vec<BenchOperation>,
        /// Iterations per operation.
        #[arg(long, default_value_t = 100)]
        iterations: usize,
        /// Concurrent tasks.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Resolve a root template against the local registry.
    Resolve {
        /// Root specification: `name` or `name@constraint`.
        root: String,
    },

    /// Check for template updates and apply them.
    Update {
        /// Report the plan without applying it.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.templates_dir);

    log::info!("templar {} starting", templar::VERSION);

    let registry = Arc::new(TemplateRegistry::new());
    if let Err(e) = registry.scan(&cli.templates_dir) {
        log::warn!("registry scan failed: {}", e);
    }

    let token = CancellationToken::new();
    let code = match cli.command {
        Command::Benchmark {
            templates,
            operations,
            iterations,
            concurrency,
            output,
        } => {
            let options = commands::BenchmarkOptions {
                templates,
                operations,
                iterations,
                concurrency,
                output,
            };
            let report = commands::benchmark::run(&options).await;
            print!("{}", report.render(options.output));
            commands::EXIT_SUCCESS
        }
        Command::Resolve { root } => match commands::resolve::run(&root, registry, &token).await {
            Ok((_, code)) => code,
            Err(e) => {
                eprintln!("resolve failed: {}", e);
                commands::EXIT_FAILURE
            }
        },
        Command::Update { dry_run } => {
            commands::update::run(registry, &config, dry_run, &token).await
        }
    };

    std::process::exit(code);
}
