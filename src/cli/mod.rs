//! redmesh CLI - Command-line interface for REDengine file format tools

pub mod commands;

use clap::Parser;
use commands::Commands;

#[derive(Parser)]
#[command(name = "redmesh")]
#[command(about = "redmesh: REDengine file format tools for Cyberpunk 2077", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Run the redmesh CLI
///
/// # Errors
/// Propagates command failures to the process exit code.
pub fn run_cli() -> anyhow::Result<()> {
    // Setup logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    cli.command.execute()?;

    Ok(())
}
