pub mod inspect;
pub mod migrate;

use jaunt_migrate::{MigrateError, Migrator, SequenceKey};

use crate::cli::Cli;
use crate::config::{self, FileConfig};

/// Prefixes library errors with their kind, e.g. `DriftError: ...`.
pub fn describe(e: MigrateError) -> anyhow::Error {
    anyhow::anyhow!("{}: {e}", e.kind())
}

/// Builds a connected migrator from flags, env vars and the config file.
pub async fn connect(
    cli: &Cli,
    file: &FileConfig,
    target: Option<SequenceKey>,
) -> anyhow::Result<Migrator> {
    let database = config::resolve_database(cli, file)?;
    let migrator = config::resolve_migrator(cli, file, target);
    Migrator::connect(&database, migrator).await.map_err(describe)
}
