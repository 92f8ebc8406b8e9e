//! Migration file discovery.
//!
//! A migration is a file named `<key>_<name>.sql` where `key` is a run of
//! ASCII digits, optionally prefixed with `V` and separated from the name by
//! one or two underscores (`0003_add_users.sql`, `V3__add_users.sql`).
//! Discovery only reads; files are never modified.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^V?(?P<key>[0-9]+)__?(?P<name>[^_].*)\.sql$").expect("valid file name pattern")
});

/// Orderable identifier taken from a migration file name.
///
/// Keys compare numerically: leading zeros are not significant, so `0002`
/// sorts before `10` and `007` equals `7`. The raw token is kept for display
/// and is what the ledger stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SequenceKey {
    raw: String,
}

impl SequenceKey {
    /// Parses a key token. Returns `None` unless the token is non-empty ASCII digits.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            raw: token.to_string(),
        })
    }

    /// The key exactly as written in the file name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn significant(&self) -> &str {
        self.raw.trim_start_matches('0')
    }
}

impl PartialEq for SequenceKey {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for SequenceKey {}

impl Hash for SequenceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl Ord for SequenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.significant(), other.significant());
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for SequenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for SequenceKey {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            MigrateError::config(format!("invalid sequence key {s:?}: expected ASCII digits"))
        })
    }
}

impl TryFrom<String> for SequenceKey {
    type Error = MigrateError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SequenceKey> for String {
    fn from(key: SequenceKey) -> Self {
        key.raw
    }
}

/// Computes the drift fingerprint of migration content: lower-case hex SHA-256.
#[must_use]
pub fn fingerprint(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Splits a file name into its sequence key and name.
#[must_use]
pub fn parse_file_name(file_name: &str) -> Option<(SequenceKey, String)> {
    let caps = FILE_NAME.captures(file_name)?;
    let key = SequenceKey::parse(&caps["key"])?;
    Some((key, caps["name"].to_string()))
}

/// A discovered migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    sequence_key: SequenceKey,
    name: String,
    path: PathBuf,
    content: String,
    fingerprint: String,
}

impl MigrationFile {
    /// Creates a migration from its parts, computing the fingerprint.
    #[must_use]
    pub fn new(
        sequence_key: SequenceKey,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            fingerprint: fingerprint(&content),
            sequence_key,
            name: name.into(),
            path: path.into(),
            content,
        }
    }

    #[must_use]
    pub fn sequence_key(&self) -> &SequenceKey {
        &self.sequence_key
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw SQL executed when the migration is applied.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// A file in the migrations directory that was not treated as a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of scanning a migrations directory.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Parsed migrations, unique by sequence key, in file-path order.
    pub migrations: Vec<MigrationFile>,
    /// Files skipped because their names did not parse.
    pub excluded: Vec<ExcludedFile>,
}

/// Scans `root` for migration files.
///
/// Subdirectories are ignored. Hidden files and files whose names do not
/// parse are excluded with a warning. Two files with the same sequence key
/// fail the whole discovery with [`MigrateError::DuplicateSequence`].
///
/// # Errors
///
/// Returns [`MigrateError::Source`] if the directory or a migration file
/// cannot be read, and [`MigrateError::DuplicateSequence`] on key collisions.
pub fn discover(root: &Path) -> Result<Discovery> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| MigrateError::Source { path, source }
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(root).map_err(io_err(root))? {
        let path = entry.map_err(io_err(root))?.path();
        if !path.is_dir() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut discovery = Discovery::default();
    let mut seen: HashMap<SequenceKey, PathBuf> = HashMap::new();

    for path in paths {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            exclude(&mut discovery, path, "file name is not valid UTF-8");
            continue;
        };
        if file_name.starts_with('.') {
            exclude(&mut discovery, path, "hidden file");
            continue;
        }
        let Some((key, name)) = parse_file_name(file_name) else {
            exclude(
                &mut discovery,
                path,
                "file name does not match <sequence>_<name>.sql",
            );
            continue;
        };

        if let Some(first) = seen.get(&key) {
            return Err(MigrateError::DuplicateSequence {
                key: key.to_string(),
                first: first.clone(),
                second: path,
            });
        }

        let content = fs::read_to_string(&path).map_err(io_err(&path))?;
        debug!(key = %key, name = %name, "Discovered migration");
        seen.insert(key.clone(), path.clone());
        discovery
            .migrations
            .push(MigrationFile::new(key, name, path, content));
    }

    Ok(discovery)
}

fn exclude(discovery: &mut Discovery, path: PathBuf, reason: &str) {
    warn!(path = %path.display(), reason, "Excluding file from migrations");
    discovery.excluded.push(ExcludedFile {
        path,
        reason: reason.to_string(),
    });
}
