use anyhow::Result;

use crate::cli::{Cli, OutputFormat, UpArgs};
use crate::commands::{connect, describe};
use crate::config::FileConfig;
use crate::output;

/// `jaunt up`. Returns `false` when a migration failed.
pub async fn up(cli: &Cli, file: &FileConfig, args: &UpArgs, format: OutputFormat) -> Result<bool> {
    let migrator = connect(cli, file, args.target.clone()).await?;

    if args.dry_run {
        let plan = migrator.plan().await.map_err(describe)?;
        output::print_plan(&plan, format)?;
        return Ok(true);
    }

    let report = migrator.run().await.map_err(describe)?;
    output::print_report(&report, format)?;
    Ok(report.is_success())
}

/// `jaunt init`
pub async fn init(cli: &Cli, file: &FileConfig) -> Result<bool> {
    let migrator = connect(cli, file, None).await?;
    migrator.init().await.map_err(describe)?;
    output::print_success(&format!(
        "Ledger table {} is ready",
        migrator.ledger().table()
    ));
    Ok(true)
}
