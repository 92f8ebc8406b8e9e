use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use jaunt_migrate::SequenceKey;

#[derive(Parser)]
#[command(name = "jaunt")]
#[command(about = "Apply forward-only SQL migrations to PostgreSQL")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL (overrides config file and DATABASE_URL env var)
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Directory containing migration files
    #[arg(short, long, global = true, env = "JAUNT_MIGRATIONS_DIR")]
    pub migrations_dir: Option<PathBuf>,

    /// Ledger table name, optionally schema-qualified
    #[arg(long, global = true, env = "JAUNT_LEDGER_TABLE")]
    pub ledger_table: Option<String>,

    /// Config file (defaults to ./jaunt.toml when present)
    #[arg(short, long, global = true, env = "JAUNT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "JAUNT_LOG", default_value = "warn")]
    pub log_level: String,
}

#[derive(Clone, Copy, ValueEnum, Default, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending migrations
    Up(UpArgs),
    /// Show applied, pending, drifted and missing migrations
    Status,
    /// List migration files without connecting to the database
    List,
    /// Create the ledger table
    Init,
}

#[derive(clap::Args)]
pub struct UpArgs {
    /// Apply migrations up to and including this sequence key
    #[arg(short, long)]
    pub target: Option<SequenceKey>,
    /// Print the plan without applying anything
    #[arg(long)]
    pub dry_run: bool,
}
