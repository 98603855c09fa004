//! Codewise CLI entry point.

use clap::Parser;
use codewise::cli::{self, CacheCommands, Cli, Commands, EXIT_ERROR};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("codewise=info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    // Ignore failure: a subscriber may already be installed.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze(args) => cli::run_analyze(&args),
        Commands::Cache(CacheCommands::List(args)) => cli::run_cache_list(&args),
        Commands::Cache(CacheCommands::Status(args)) => cli::run_cache_status(&args),
        Commands::Cache(CacheCommands::Clear(args)) => cli::run_cache_clear(&args),
        Commands::Improve(args) => cli::run_improve(&args),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}
