use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jaunt_migrate::{DatabaseConfig, MigratorConfig, SequenceKey};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "jaunt.toml";

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub database: DatabaseSection,
    pub migrations: MigrationsSection,
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub pool_size: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub statement_timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationsSection {
    pub dir: Option<PathBuf>,
    pub ledger_table: Option<String>,
}

/// Loads the config file named on the command line, or `./jaunt.toml` if it
/// exists. A missing default file yields an empty config.
pub fn load(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return Ok(FileConfig::default());
            }
            default
        }
    };
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut cfg: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    // Relative directories in the file are relative to the file itself.
    if let (Some(dir), Some(parent)) = (cfg.migrations.dir.as_mut(), path.parent())
        && dir.is_relative()
    {
        *dir = parent.join(&*dir);
    }
    Ok(cfg)
}

/// Resolves the migrator settings. Flags and env vars win over the file.
pub fn resolve_migrator(
    cli: &Cli,
    file: &FileConfig,
    target: Option<SequenceKey>,
) -> MigratorConfig {
    let mut config = MigratorConfig::default().with_target(target);
    if let Some(dir) = cli.migrations_dir.clone().or_else(|| file.migrations.dir.clone()) {
        config.migrations_dir = dir;
    }
    if let Some(table) = cli
        .ledger_table
        .clone()
        .or_else(|| file.migrations.ledger_table.clone())
    {
        config.ledger_table = table;
    }
    config
}

/// Resolves the database settings. Fails if no URL is configured anywhere.
pub fn resolve_database(cli: &Cli, file: &FileConfig) -> Result<DatabaseConfig> {
    // 1. --database-url flag / DATABASE_URL env
    // 2. [database] url in the config file
    let Some(url) = cli.database_url.clone().or_else(|| file.database.url.clone()) else {
        anyhow::bail!(
            "No database URL configured. Use --database-url, set DATABASE_URL, or add `url` under [database] in {DEFAULT_CONFIG_FILE}"
        )
    };

    let mut config = DatabaseConfig::new(url)
        .with_statement_timeout_ms(file.database.statement_timeout_ms);
    if let Some(size) = file.database.pool_size {
        config = config.with_pool_size(size);
    }
    if let Some(timeout) = file.database.connect_timeout_ms {
        config = config.with_connect_timeout_ms(timeout);
    }
    if let Some(timeout) = file.database.idle_timeout_ms {
        config = config.with_idle_timeout_ms(Some(timeout));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["jaunt"];
        argv.extend_from_slice(args);
        argv.push("list");
        Cli::try_parse_from(argv).expect("parse")
    }

    fn file_config() -> FileConfig {
        toml::from_str(
            r#"
            [database]
            url = "postgres://file/db"
            pool_size = 3
            idle_timeout_ms = 30000
            statement_timeout_ms = 15000

            [migrations]
            dir = "sql"
            ledger_table = "ops.ledger"
            "#,
        )
        .expect("valid toml")
    }

    #[test]
    fn test_file_values_used_when_flags_absent() {
        let cli = cli(&["--database-url", "postgres://flag/db"]);
        let file = file_config();

        let migrator = resolve_migrator(&cli, &file, None);
        assert_eq!(migrator.migrations_dir, PathBuf::from("sql"));
        assert_eq!(migrator.ledger_table, "ops.ledger");

        let database = resolve_database(&cli, &file).expect("resolve");
        assert_eq!(database.pool_size, 3);
        assert_eq!(database.idle_timeout_ms, Some(30000));
        assert_eq!(database.statement_timeout_ms, Some(15000));
    }

    #[test]
    fn test_flags_override_file() {
        let cli = cli(&[
            "--database-url",
            "postgres://flag/db",
            "-m",
            "other",
            "--ledger-table",
            "flag_ledger",
        ]);
        let file = file_config();

        let migrator = resolve_migrator(&cli, &file, None);
        assert_eq!(migrator.migrations_dir, PathBuf::from("other"));
        assert_eq!(migrator.ledger_table, "flag_ledger");
        assert_eq!(
            resolve_database(&cli, &file).expect("resolve").url,
            "postgres://flag/db"
        );
    }

    #[test]
    fn test_defaults_without_file() {
        let cli = cli(&["-m", "migrations", "--database-url", "postgres://flag/db"]);
        let migrator = resolve_migrator(&cli, &FileConfig::default(), None);
        assert_eq!(migrator.ledger_table, jaunt_migrate::DEFAULT_LEDGER_TABLE);

        let database = resolve_database(&cli, &FileConfig::default()).expect("resolve");
        assert_eq!(
            database.idle_timeout_ms,
            jaunt_migrate::DatabaseConfig::default().idle_timeout_ms
        );
    }

    #[test]
    fn test_load_resolves_dir_relative_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jaunt.toml");
        fs::write(&path, "[migrations]\ndir = \"sql\"\n").expect("write");

        let cfg = load(Some(&path)).expect("load");
        assert_eq!(cfg.migrations.dir, Some(dir.path().join("sql")));
        assert_eq!(cfg.database, DatabaseSection::default());
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jaunt.toml");
        fs::write(&path, "[migrations]\ndirectory = \"sql\"\n").expect("write");
        assert!(load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
