//! Reconciliation of discovered migrations against the ledger.
//!
//! This is where recorded history is checked before anything is executed:
//! every ledger entry must still have its file, byte-for-byte unchanged.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::ledger::LedgerEntry;
use crate::source::{MigrationFile, SequenceKey};

/// Ordered migrations waiting to be applied.
///
/// Sorted ascending by sequence key; two reconciliations of the same inputs
/// produce the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    migrations: Vec<MigrationFile>,
}

impl Plan {
    /// Returns true when there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationFile> {
        self.migrations.iter()
    }

    /// Drops every migration whose key is greater than `target`.
    #[must_use]
    pub fn up_to(mut self, target: &SequenceKey) -> Self {
        self.migrations.retain(|m| m.sequence_key() <= target);
        self
    }
}

impl IntoIterator for Plan {
    type Item = MigrationFile;
    type IntoIter = std::vec::IntoIter<MigrationFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.into_iter()
    }
}

/// Computes the plan for `files` given the recorded `ledger`.
///
/// # Errors
///
/// - [`MigrateError::MissingAppliedMigration`] if a ledger entry has no file.
/// - [`MigrateError::Drift`] if an applied migration's content changed.
pub fn reconcile(files: Vec<MigrationFile>, ledger: &[LedgerEntry]) -> Result<Plan> {
    let mut by_key: HashMap<SequenceKey, MigrationFile> = files
        .into_iter()
        .map(|m| (m.sequence_key().clone(), m))
        .collect();

    for entry in ledger {
        let Some(file) = by_key.remove(&entry.sequence_key) else {
            return Err(MigrateError::MissingAppliedMigration {
                key: entry.sequence_key.to_string(),
                name: entry.name.clone(),
            });
        };
        if file.fingerprint() != entry.fingerprint {
            return Err(MigrateError::Drift {
                key: entry.sequence_key.to_string(),
                name: entry.name.clone(),
                recorded: entry.fingerprint.clone(),
                current: file.fingerprint().to_string(),
            });
        }
    }

    let mut pending: Vec<MigrationFile> = by_key.into_values().collect();
    pending.sort_by(|a, b| a.sequence_key().cmp(b.sequence_key()));

    if let Some(latest) = ledger.iter().map(|e| &e.sequence_key).max() {
        for migration in pending.iter().filter(|m| m.sequence_key() < latest) {
            warn!(
                key = %migration.sequence_key(),
                name = migration.name(),
                latest_applied = %latest,
                "Pending migration sorts before an applied one; it will be applied out of order"
            );
        }
    }

    debug!(
        applied = ledger.len(),
        pending = pending.len(),
        "Reconciled migrations"
    );
    Ok(Plan { migrations: pending })
}
