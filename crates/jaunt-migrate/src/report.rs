//! Summary of a migration run.

use std::time::Duration;

use serde::Serialize;

use crate::source::{ExcludedFile, SequenceKey};

/// What happened to one migration during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum RunOutcome {
    /// Executed and recorded in this run.
    Applied,
    /// Already in the ledger before this run.
    SkippedAlreadyApplied,
    /// Execution, recording or commit failed; the transaction was rolled back.
    Failed { reason: String },
}

impl RunOutcome {
    /// Short label for display.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::SkippedAlreadyApplied => "skipped-already-applied",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub sequence_key: SequenceKey,
    pub name: String,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    /// Wall time spent on this migration; zero for skipped entries.
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

/// Immutable result of a run, handed back to the caller for display and
/// exit-code decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    entries: Vec<MigrationOutcome>,
    excluded: Vec<ExcludedFile>,
    #[serde(with = "duration_ms")]
    elapsed: Duration,
}

impl Report {
    pub(crate) fn new(
        entries: Vec<MigrationOutcome>,
        excluded: Vec<ExcludedFile>,
        elapsed: Duration,
    ) -> Self {
        Self {
            entries,
            excluded,
            elapsed,
        }
    }

    /// Every examined migration: already-applied ones first, then plan
    /// outcomes in the order they were attempted.
    #[must_use]
    pub fn entries(&self) -> &[MigrationOutcome] {
        &self.entries
    }

    pub fn applied(&self) -> impl Iterator<Item = &MigrationOutcome> {
        self.entries
            .iter()
            .filter(|e| e.outcome == RunOutcome::Applied)
    }

    pub fn failed(&self) -> impl Iterator<Item = &MigrationOutcome> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, RunOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied().count()
    }

    /// Files in the migrations directory that were not treated as migrations.
    #[must_use]
    pub fn excluded(&self) -> &[ExcludedFile] {
        &self.excluded
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// False if any migration failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}
