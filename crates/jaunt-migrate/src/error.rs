//! Error types for the migration engine.

use std::path::PathBuf;

use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL error code for unique constraint violation (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Checks if a sqlx error is "undefined table" (42P01).
pub fn is_undefined_table(err: &SqlxError) -> bool {
    has_pg_error_code(err, PG_UNDEFINED_TABLE)
}

/// Checks if a sqlx error is "unique violation" (23505).
pub fn is_unique_violation(err: &SqlxError) -> bool {
    has_pg_error_code(err, PG_UNIQUE_VIOLATION)
}

/// Fatal errors that abort a migration run.
///
/// Failures of an individual migration's SQL are not represented here: they
/// are recorded as [`RunOutcome::Failed`](crate::RunOutcome::Failed) in the
/// [`Report`](crate::Report) instead.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Two migration files parse to the same sequence key.
    #[error("duplicate sequence key {key}: {} and {}", first.display(), second.display())]
    DuplicateSequence {
        key: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A migration source could not be read.
    #[error("failed to read migration source {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An applied migration's file content no longer matches the ledger.
    #[error(
        "migration {key} ({name}) has changed since it was applied: recorded fingerprint {recorded}, current {current}"
    )]
    Drift {
        key: String,
        name: String,
        recorded: String,
        current: String,
    },

    /// The ledger records a migration whose file no longer exists.
    #[error("migration {key} ({name}) is recorded as applied but its file is missing")]
    MissingAppliedMigration { key: String, name: String },

    /// Another run holds the migration lock.
    #[error("another migration run holds the lock (advisory lock key {key})")]
    ConcurrentRun { key: i64 },

    /// The ledger table could not be read.
    #[error("ledger unavailable: {message}")]
    LedgerUnavailable { message: String },

    /// The ledger already contains an entry for this key.
    #[error("ledger already contains an entry for sequence key {key}")]
    DuplicateEntry { key: String },

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] SqlxError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl MigrateError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new ledger-unavailable error.
    #[must_use]
    pub fn ledger_unavailable(message: impl Into<String>) -> Self {
        Self::LedgerUnavailable {
            message: message.into(),
        }
    }

    /// Stable name of the error kind, suitable for messages and exit reporting.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateSequence { .. } => "DuplicateSequenceError",
            Self::Source { .. } => "SourceError",
            Self::Drift { .. } => "DriftError",
            Self::MissingAppliedMigration { .. } => "MissingAppliedMigrationError",
            Self::ConcurrentRun { .. } => "ConcurrentRunError",
            Self::LedgerUnavailable { .. } => "LedgerUnavailableError",
            Self::DuplicateEntry { .. } => "DuplicateEntryError",
            Self::Connection(_) => "ConnectionError",
            Self::Config { .. } => "ConfigError",
        }
    }

    /// Returns true for errors raised because recorded history disagrees with
    /// the migration files.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::Drift { .. } | Self::MissingAppliedMigration { .. }
        )
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
