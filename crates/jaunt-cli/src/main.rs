mod cli;
mod commands;
mod config;
mod logging;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level);

    match run(&cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&format!("{e:#}"));
            std::process::exit(1);
        }
    }
}

/// Runs the selected command. `Ok(false)` means the command completed but
/// found a failure worth a non-zero exit code.
async fn run(cli: &Cli) -> Result<bool> {
    let format = cli.format.unwrap_or_default();
    let file = config::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Up(args) => commands::migrate::up(cli, &file, args, format).await,
        Commands::Init => commands::migrate::init(cli, &file).await,
        Commands::Status => commands::inspect::status(cli, &file, format).await,
        Commands::List => commands::inspect::list(cli, &file, format),
    }
}
