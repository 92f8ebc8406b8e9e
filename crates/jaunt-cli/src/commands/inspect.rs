use anyhow::Result;

use crate::cli::{Cli, OutputFormat};
use crate::commands::{connect, describe};
use crate::config::{self, FileConfig};
use crate::output;

/// `jaunt status`. Drifted and missing migrations are shown, not raised.
pub async fn status(cli: &Cli, file: &FileConfig, format: OutputFormat) -> Result<bool> {
    let migrator = connect(cli, file, None).await?;
    let report = migrator.status().await.map_err(describe)?;
    output::print_status(&report, format)?;

    if report.has_integrity_problems() && format == OutputFormat::Table {
        output::print_warning(
            "Applied migrations no longer match the files on disk; `up` will refuse to run",
        );
    }
    Ok(true)
}

/// `jaunt list`. Works offline: only the migrations directory is read.
pub fn list(cli: &Cli, file: &FileConfig, format: OutputFormat) -> Result<bool> {
    let settings = config::resolve_migrator(cli, file, None);
    let mut discovery = jaunt_migrate::discover(&settings.migrations_dir).map_err(describe)?;
    discovery
        .migrations
        .sort_by(|a, b| a.sequence_key().cmp(b.sequence_key()));
    output::print_discovered(&discovery.migrations, &discovery.excluded, format)?;
    Ok(true)
}
