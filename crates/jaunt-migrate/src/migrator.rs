//! Orchestration of a migration run.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx_postgres::{PgConnection, PgPool};
use tracing::{info, instrument, warn};

use crate::apply::Applier;
use crate::config::{DatabaseConfig, MigratorConfig};
use crate::error::Result;
use crate::ledger::{LedgerEntry, LedgerStore};
use crate::lock::MigrationLock;
use crate::pool::create_pool;
use crate::reconcile::{Plan, reconcile};
use crate::report::{MigrationOutcome, Report, RunOutcome};
use crate::source::{self, Discovery, ExcludedFile, MigrationFile, SequenceKey};

/// State of a single migration as seen by [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Applied { applied_at: DateTime<Utc> },
    Pending,
    /// Applied, but the file content has changed since.
    Drifted { applied_at: DateTime<Utc> },
    /// Applied, but the file is gone.
    Missing { applied_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub sequence_key: SequenceKey,
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

/// Read-only view of files and ledger, ordered by sequence key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub migrations: Vec<MigrationStatus>,
    pub excluded: Vec<ExcludedFile>,
}

impl StatusReport {
    /// Returns true if any migration is drifted or missing.
    #[must_use]
    pub fn has_integrity_problems(&self) -> bool {
        self.migrations.iter().any(|m| {
            matches!(
                m.state,
                MigrationState::Drifted { .. } | MigrationState::Missing { .. }
            )
        })
    }
}

/// Runs migrations from one directory against one database.
///
/// The database handle is passed in explicitly; nothing here is global, so
/// independent migrators can target isolated databases side by side.
#[derive(Debug, Clone)]
pub struct Migrator {
    pool: PgPool,
    config: MigratorConfig,
    ledger: LedgerStore,
}

impl Migrator {
    /// Creates a migrator over an existing pool.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the ledger table name is invalid.
    pub fn new(pool: PgPool, config: MigratorConfig) -> Result<Self> {
        let ledger = LedgerStore::new(config.ledger_table.clone())?;
        Ok(Self {
            pool,
            config,
            ledger,
        })
    }

    /// Creates a pool from `database` and a migrator over it.
    pub async fn connect(database: &DatabaseConfig, config: MigratorConfig) -> Result<Self> {
        let pool = create_pool(database).await?;
        Self::new(pool, config)
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    #[must_use]
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Applies every pending migration (up to the configured target).
    ///
    /// Discovery happens before any database access. The rest of the run
    /// (ledger creation, reading, reconciliation and application) happens
    /// under the advisory lock on a single connection.
    ///
    /// # Errors
    ///
    /// Fatal conditions (duplicate keys, drift, missing files, a concurrent
    /// run, an unreadable ledger) are returned as errors before any migration
    /// executes. A failing migration is not an error: it is reported as
    /// [`RunOutcome::Failed`] and ends the run.
    #[instrument(skip(self), fields(dir = %self.config.migrations_dir.display(), ledger = %self.ledger.table()))]
    pub async fn run(&self) -> Result<Report> {
        let started = Instant::now();
        let Discovery {
            migrations,
            excluded,
        } = source::discover(&self.config.migrations_dir)?;

        let mut lock = self.lock().await?;
        let result = match lock.connection() {
            Ok(conn) => self.run_locked(conn, migrations).await,
            Err(e) => Err(e),
        };
        if let Err(e) = lock.release().await {
            warn!(error = %e, "Failed to release migration lock");
        }

        let entries = result?;
        let report = Report::new(entries, excluded, started.elapsed());
        info!(
            applied = report.applied_count(),
            success = report.is_success(),
            "Migration run finished"
        );
        Ok(report)
    }

    async fn run_locked(
        &self,
        conn: &mut PgConnection,
        files: Vec<MigrationFile>,
    ) -> Result<Vec<MigrationOutcome>> {
        self.ledger.ensure_exists(conn).await?;
        let ledger = self.ledger.read_all(conn).await?;
        let plan = self.plan_from(files, &ledger)?;

        let mut entries: Vec<MigrationOutcome> = ledger.iter().map(skipped).collect();
        entries.extend(Applier::new(&self.ledger).apply(conn, plan).await);
        Ok(entries)
    }

    fn plan_from(&self, files: Vec<MigrationFile>, ledger: &[LedgerEntry]) -> Result<Plan> {
        let plan = reconcile(files, ledger)?;
        Ok(match &self.config.target {
            Some(target) => plan.up_to(target),
            None => plan,
        })
    }

    /// Computes what [`Migrator::run`] would apply, without locking or writing.
    ///
    /// A database without a ledger table is treated as having an empty ledger.
    #[instrument(skip(self))]
    pub async fn plan(&self) -> Result<Plan> {
        let discovery = source::discover(&self.config.migrations_dir)?;
        let ledger = self.read_ledger_if_present().await?;
        self.plan_from(discovery.migrations, &ledger)
    }

    /// Reports the state of every discovered or recorded migration.
    ///
    /// Unlike [`Migrator::run`], drift and missing files are reported rather
    /// than raised.
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<StatusReport> {
        let discovery = source::discover(&self.config.migrations_dir)?;
        let ledger = self.read_ledger_if_present().await?;
        Ok(build_status(discovery, ledger))
    }

    /// Creates the ledger table under the migration lock.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        let mut lock = self.lock().await?;
        let result = match lock.connection() {
            Ok(conn) => self.ledger.ensure_exists(conn).await,
            Err(e) => Err(e),
        };
        lock.release().await?;
        result
    }

    /// Takes the advisory lock for this ledger.
    async fn lock(&self) -> Result<MigrationLock> {
        let mut conn = self.pool.acquire().await?;
        let key = self.ledger.resolve_lock_key(&mut conn).await?;
        MigrationLock::acquire_on(conn, key).await
    }

    async fn read_ledger_if_present(&self) -> Result<Vec<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        if self.ledger.exists(&mut conn).await? {
            self.ledger.read_all(&mut conn).await
        } else {
            Ok(Vec::new())
        }
    }
}

fn skipped(entry: &LedgerEntry) -> MigrationOutcome {
    MigrationOutcome {
        sequence_key: entry.sequence_key.clone(),
        name: entry.name.clone(),
        outcome: RunOutcome::SkippedAlreadyApplied,
        elapsed: Duration::ZERO,
    }
}

fn build_status(discovery: Discovery, ledger: Vec<LedgerEntry>) -> StatusReport {
    let mut files: BTreeMap<SequenceKey, MigrationFile> = discovery
        .migrations
        .into_iter()
        .map(|m| (m.sequence_key().clone(), m))
        .collect();

    let mut migrations = Vec::with_capacity(files.len() + ledger.len());
    for entry in ledger {
        let state = match files.remove(&entry.sequence_key) {
            None => MigrationState::Missing {
                applied_at: entry.applied_at,
            },
            Some(file) if file.fingerprint() != entry.fingerprint => MigrationState::Drifted {
                applied_at: entry.applied_at,
            },
            Some(_) => MigrationState::Applied {
                applied_at: entry.applied_at,
            },
        };
        migrations.push(MigrationStatus {
            sequence_key: entry.sequence_key,
            name: entry.name,
            state,
        });
    }
    migrations.extend(files.into_values().map(|file| MigrationStatus {
        sequence_key: file.sequence_key().clone(),
        name: file.name().to_string(),
        state: MigrationState::Pending,
    }));
    migrations.sort_by(|a, b| a.sequence_key.cmp(&b.sequence_key));

    StatusReport {
        migrations,
        excluded: discovery.excluded,
    }
}
