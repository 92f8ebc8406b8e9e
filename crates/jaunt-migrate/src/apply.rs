//! Execution of a plan, one transaction per migration.

use std::time::{Duration, Instant};

use sqlx_core::connection::Connection;
use sqlx_core::raw_sql::raw_sql;
use sqlx_postgres::PgConnection;
use tracing::{error, info, instrument, warn};

use crate::error::{MigrateError, Result};
use crate::ledger::{LedgerEntry, LedgerStore};
use crate::reconcile::Plan;
use crate::report::{MigrationOutcome, RunOutcome};
use crate::source::MigrationFile;

/// Applies planned migrations sequentially on a single connection.
///
/// Each migration runs in its own transaction together with its ledger row.
/// The first failure is rolled back and ends the run; later migrations stay
/// pending for the next invocation.
pub struct Applier<'a> {
    ledger: &'a LedgerStore,
}

impl<'a> Applier<'a> {
    #[must_use]
    pub fn new(ledger: &'a LedgerStore) -> Self {
        Self { ledger }
    }

    /// Applies `plan` in order and returns one outcome per attempted migration.
    #[instrument(skip_all, fields(pending = plan.len()))]
    pub async fn apply(&self, conn: &mut PgConnection, plan: Plan) -> Vec<MigrationOutcome> {
        let mut outcomes = Vec::with_capacity(plan.len());

        for migration in plan {
            let started = Instant::now();
            let result = self.apply_one(conn, &migration).await;
            let elapsed = started.elapsed();

            match result {
                Ok(entry) => {
                    info!(
                        key = %entry.sequence_key,
                        name = %entry.name,
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        "Applied migration"
                    );
                    outcomes.push(outcome(&migration, RunOutcome::Applied, elapsed));
                }
                Err(e) => {
                    error!(
                        key = %migration.sequence_key(),
                        name = migration.name(),
                        error = %e,
                        "Migration failed; stopping"
                    );
                    let failed = RunOutcome::Failed {
                        reason: e.to_string(),
                    };
                    outcomes.push(outcome(&migration, failed, elapsed));
                    break;
                }
            }
        }

        outcomes
    }

    /// Runs one migration and its ledger insert inside a single transaction.
    async fn apply_one(
        &self,
        conn: &mut PgConnection,
        migration: &MigrationFile,
    ) -> Result<LedgerEntry> {
        let empty = migration.content().trim().is_empty();
        if empty {
            warn!(key = %migration.sequence_key(), "Migration is empty");
        }

        let mut tx = Connection::begin(&mut *conn).await?;

        // Empty migrations are still recorded, so the ledger matches the directory.
        let executed = if empty {
            self.ledger.record_applied(&mut tx, migration).await
        } else {
            match raw_sql(migration.content()).execute(&mut *tx).await {
                Ok(_) => self.ledger.record_applied(&mut tx, migration).await,
                Err(e) => Err(MigrateError::from(e)),
            }
        };

        match executed {
            Ok(entry) => {
                tx.commit().await?;
                Ok(entry)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    // Dropping the transaction still issues ROLLBACK on the connection.
                    warn!(error = %rollback_err, "Explicit rollback failed");
                }
                Err(e)
            }
        }
    }
}

fn outcome(migration: &MigrationFile, outcome: RunOutcome, elapsed: Duration) -> MigrationOutcome {
    MigrationOutcome {
        sequence_key: migration.sequence_key().clone(),
        name: migration.name().to_string(),
        outcome,
        elapsed,
    }
}
