use anyhow::Result;
use colored::Colorize;
use jaunt_migrate::{
    ExcludedFile, MigrationFile, MigrationState, Plan, Report, RunOutcome, StatusReport,
};
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_excluded(excluded: &[ExcludedFile]) {
    for file in excluded {
        print_warning(&format!(
            "Ignored {}: {}",
            file.path.display(),
            file.reason
        ));
    }
}

#[derive(Serialize)]
struct PlannedMigration<'a> {
    sequence_key: String,
    name: &'a str,
    path: String,
    fingerprint: &'a str,
}

impl<'a> From<&'a MigrationFile> for PlannedMigration<'a> {
    fn from(m: &'a MigrationFile) -> Self {
        Self {
            sequence_key: m.sequence_key().to_string(),
            name: m.name(),
            path: m.path().display().to_string(),
            fingerprint: m.fingerprint(),
        }
    }
}

pub fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }

    print_excluded(report.excluded());

    if !report.entries().is_empty() {
        let mut builder = Builder::default();
        builder.push_record(["Key", "Name", "Outcome", "Time (ms)"]);
        for entry in report.entries() {
            let outcome = match &entry.outcome {
                RunOutcome::Applied => entry.outcome.label().green().to_string(),
                RunOutcome::SkippedAlreadyApplied => entry.outcome.label().dimmed().to_string(),
                RunOutcome::Failed { .. } => entry.outcome.label().red().to_string(),
            };
            builder.push_record([
                entry.sequence_key.to_string(),
                entry.name.clone(),
                outcome,
                entry.elapsed.as_millis().to_string(),
            ]);
        }
        println!("{}", builder.build().with(Style::rounded()));
    }

    for failed in report.failed() {
        if let RunOutcome::Failed { reason } = &failed.outcome {
            print_error(&format!(
                "Migration {} ({}) failed: {}",
                failed.sequence_key, failed.name, reason
            ));
        }
    }

    match report.applied_count() {
        0 if report.is_success() => print_success("Nothing to apply"),
        0 => {}
        n => print_success(&format!(
            "Applied {n} migration(s) in {} ms",
            report.elapsed().as_millis()
        )),
    }
    Ok(())
}

pub fn print_plan(plan: &Plan, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let planned: Vec<PlannedMigration<'_>> = plan.iter().map(PlannedMigration::from).collect();
        return print_json(&planned);
    }

    if plan.is_empty() {
        print_success("Nothing to apply");
        return Ok(());
    }
    println!("{} migration(s) to apply:", plan.len());
    print_files(plan.iter());
    Ok(())
}

pub fn print_files<'a>(files: impl Iterator<Item = &'a MigrationFile>) {
    let mut builder = Builder::default();
    builder.push_record(["Key", "Name", "File"]);
    for file in files {
        builder.push_record([
            file.sequence_key().to_string(),
            file.name().to_string(),
            file.path().display().to_string(),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
}

pub fn print_discovered(
    files: &[MigrationFile],
    excluded: &[ExcludedFile],
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        let listed: Vec<PlannedMigration<'_>> = files.iter().map(PlannedMigration::from).collect();
        return print_json(&listed);
    }

    print_excluded(excluded);
    if files.is_empty() {
        println!("No migrations found.");
    } else {
        print_files(files.iter());
    }
    Ok(())
}

pub fn print_status(status: &StatusReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(status);
    }

    print_excluded(&status.excluded);
    if status.migrations.is_empty() {
        println!("No migrations found.");
        return Ok(());
    }

    let mut builder = Builder::default();
    builder.push_record(["Key", "Name", "State", "Applied at"]);
    for m in &status.migrations {
        let (state, applied_at) = match &m.state {
            MigrationState::Applied { applied_at } => ("applied".green(), Some(applied_at)),
            MigrationState::Pending => ("pending".yellow(), None),
            MigrationState::Drifted { applied_at } => ("drifted".red(), Some(applied_at)),
            MigrationState::Missing { applied_at } => ("missing".red(), Some(applied_at)),
        };
        builder.push_record([
            m.sequence_key.to_string(),
            m.name.clone(),
            state.to_string(),
            applied_at.map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
    Ok(())
}
