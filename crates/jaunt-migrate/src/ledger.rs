//! The ledger: a bookkeeping table recording every applied migration.
//!
//! All operations take an explicit connection so that the ledger participates
//! in whatever session (and advisory lock) the caller holds. `record_applied`
//! in particular runs on the caller's open transaction, making the ledger row
//! part of the same atomic unit as the migration's own statements.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgConnection;
use tracing::{debug, instrument};

use crate::error::{MigrateError, Result, is_undefined_table, is_unique_violation};
use crate::source::{MigrationFile, SequenceKey};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_]{0,62}\.)?[A-Za-z_][A-Za-z0-9_]{0,62}$")
        .expect("valid identifier pattern")
});

/// A row of the ledger table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub sequence_key: SequenceKey,
    pub name: String,
    pub fingerprint: String,
    pub applied_at: DateTime<Utc>,
}

/// Reads and appends ledger rows in a single, named table.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    table: String,
}

impl LedgerStore {
    /// Creates a store for `table`, which may be schema-qualified (`ops.ledger`).
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Config`] if the name is not a plain PostgreSQL
    /// identifier.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !IDENTIFIER.is_match(&table) {
            return Err(MigrateError::config(format!(
                "invalid ledger table name {table:?}"
            )));
        }
        Ok(Self { table })
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Case-folded, schema-qualified name identifying the ledger relation.
    ///
    /// Names are unquoted identifiers, so PostgreSQL folds them to lower case.
    /// Unqualified names resolve against `current_schema`.
    #[must_use]
    pub fn qualified_name(&self, current_schema: Option<&str>) -> String {
        let table = self.table.to_ascii_lowercase();
        match current_schema {
            Some(schema) if !table.contains('.') => format!("{schema}.{table}"),
            _ => table,
        }
    }

    /// Advisory lock key guarding runs against this ledger.
    ///
    /// Derived from [`LedgerStore::qualified_name`], so every spelling of the
    /// same table shares a key while separate ledgers never contend.
    #[must_use]
    pub fn lock_key(&self, current_schema: Option<&str>) -> i64 {
        let qualified = self.qualified_name(current_schema);
        let digest = Sha256::digest(format!("jaunt:{qualified}").as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }

    /// Computes [`LedgerStore::lock_key`] using the session's `current_schema()`.
    #[instrument(skip(self, conn), fields(table = %self.table))]
    pub async fn resolve_lock_key(&self, conn: &mut PgConnection) -> Result<i64> {
        let schema: Option<String> = query_scalar("SELECT current_schema()::text")
            .fetch_one(&mut *conn)
            .await?;
        Ok(self.lock_key(schema.as_deref()))
    }

    fn create_table_sql(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                sequence_key TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                fingerprint CHAR(64) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            self.table
        )
    }

    /// Creates the ledger table if it does not exist. Safe to call every run.
    #[instrument(skip(self, conn), fields(table = %self.table))]
    pub async fn ensure_exists(&self, conn: &mut PgConnection) -> Result<()> {
        query(&self.create_table_sql()).execute(&mut *conn).await?;
        debug!("Ledger table ensured");
        Ok(())
    }

    /// Returns true if the ledger table exists.
    #[instrument(skip(self, conn), fields(table = %self.table))]
    pub async fn exists(&self, conn: &mut PgConnection) -> Result<bool> {
        let regclass: Option<String> = query_scalar("SELECT to_regclass($1)::text")
            .bind(self.table.as_str())
            .fetch_one(&mut *conn)
            .await?;
        Ok(regclass.is_some())
    }

    /// Reads every entry, ordered by sequence key ascending.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::LedgerUnavailable`] if the table is missing or
    /// the query fails.
    #[instrument(skip(self, conn), fields(table = %self.table))]
    pub async fn read_all(&self, conn: &mut PgConnection) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT sequence_key, name, fingerprint, applied_at FROM {}",
            self.table
        );
        let rows: Vec<(String, String, String, DateTime<Utc>)> = query_as(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| {
                if is_undefined_table(&e) {
                    MigrateError::ledger_unavailable(format!(
                        "table {} does not exist",
                        self.table
                    ))
                } else {
                    MigrateError::ledger_unavailable(e.to_string())
                }
            })?;

        let mut entries = rows
            .into_iter()
            .map(|(key, name, fingerprint, applied_at)| {
                let sequence_key = SequenceKey::parse(&key).ok_or_else(|| {
                    MigrateError::ledger_unavailable(format!(
                        "ledger row has malformed sequence key {key:?}"
                    ))
                })?;
                Ok(LedgerEntry {
                    sequence_key,
                    name,
                    fingerprint: fingerprint.trim_end().to_string(),
                    applied_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| a.sequence_key.cmp(&b.sequence_key));

        debug!(count = entries.len(), "Read ledger");
        Ok(entries)
    }

    /// Records `migration` as applied using the caller's open transaction.
    ///
    /// Never begins or commits a transaction itself.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::DuplicateEntry`] if the key is already recorded.
    #[instrument(skip(self, tx, migration), fields(key = %migration.sequence_key()))]
    pub async fn record_applied(
        &self,
        tx: &mut PgConnection,
        migration: &MigrationFile,
    ) -> Result<LedgerEntry> {
        let sql = format!(
            "INSERT INTO {} (sequence_key, name, fingerprint) VALUES ($1, $2, $3) RETURNING applied_at",
            self.table
        );
        let applied_at: DateTime<Utc> = query_scalar(&sql)
            .bind(migration.sequence_key().as_str())
            .bind(migration.name())
            .bind(migration.fingerprint())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    MigrateError::DuplicateEntry {
                        key: migration.sequence_key().to_string(),
                    }
                } else {
                    MigrateError::from(e)
                }
            })?;

        Ok(LedgerEntry {
            sequence_key: migration.sequence_key().clone(),
            name: migration.name().to_string(),
            fingerprint: migration.fingerprint().to_string(),
            applied_at,
        })
    }
}
