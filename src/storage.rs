//! Storage layer for user progress, bans and statuses
//!
//! Three line-oriented text tables plus the broadcast template live in one
//! data directory. Every save rewrites a table in full.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-user distributed catalog indices
pub const PROGRESS_FILE: &str = "user_progress.txt";
/// Per-user ban expiry timestamps
pub const BANS_FILE: &str = "user_bans.txt";
/// Per-user status tags
pub const USERS_FILE: &str = "users.txt";
/// Free-text broadcast template
pub const BROADCAST_TEMPLATE_FILE: &str = "broadcast_template.txt";

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status an administrator assigns to a registered user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Registered, nothing assigned (also the state after a ban)
    #[default]
    None,
    /// Marked with ✅
    Approved,
    /// Marked with ❌
    Rejected,
}

impl Status {
    /// Tag written to `users.txt`
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Approved => "✅",
            Self::Rejected => "❌",
        }
    }

    /// Parses a tag from `users.txt` or callback data
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "" => Some(Self::None),
            "✅" => Some(Self::Approved),
            "❌" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Human-readable label for admin views
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "Без статуса",
            Self::Approved => "✅",
            Self::Rejected => "❌",
        }
    }
}

/// Full persisted state of the user ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    /// Catalog indices handed out to each user, in order
    pub progress: BTreeMap<i64, Vec<usize>>,
    /// Ban expiry per user
    pub bans: BTreeMap<i64, DateTime<Utc>>,
    /// Status record per registered user
    pub statuses: BTreeMap<i64, Status>,
}

/// Interface for ledger persistence backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load every table; missing tables are empty
    async fn load(&self) -> Result<LedgerSnapshot, StorageError>;
    /// Rewrite every table from the snapshot
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError>;
    /// Load the broadcast template if one was saved
    async fn load_template(&self) -> Result<Option<String>, StorageError>;
    /// Replace the broadcast template
    async fn save_template(&self, text: &str) -> Result<(), StorageError>;
}

/// Flat-file storage in a single data directory
pub struct FlatFileStore {
    dir: PathBuf,
    // Serializes rewrites so two saves never interleave on disk
    write_lock: Mutex<()>,
}

impl FlatFileStore {
    /// Opens (and creates if needed) the data directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Data directory this store writes into
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_table(&self, name: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.dir.join(name)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes next to the target and renames over it
    async fn write_table(&self, name: &str, contents: &str) -> Result<(), StorageError> {
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &target).await?;
        debug!("Rewrote {}", target.display());
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FlatFileStore {
    async fn load(&self) -> Result<LedgerSnapshot, StorageError> {
        let progress = self
            .read_table(PROGRESS_FILE)
            .await?
            .map(|s| parse_progress(&s))
            .unwrap_or_default();
        let bans = self
            .read_table(BANS_FILE)
            .await?
            .map(|s| parse_bans(&s))
            .unwrap_or_default();
        let statuses = self
            .read_table(USERS_FILE)
            .await?
            .map(|s| parse_statuses(&s))
            .unwrap_or_default();

        Ok(LedgerSnapshot {
            progress,
            bans,
            statuses,
        })
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.write_table(PROGRESS_FILE, &render_progress(&snapshot.progress))
            .await?;
        self.write_table(BANS_FILE, &render_bans(&snapshot.bans))
            .await?;
        self.write_table(USERS_FILE, &render_statuses(&snapshot.statuses))
            .await
    }

    async fn load_template(&self) -> Result<Option<String>, StorageError> {
        self.read_table(BROADCAST_TEMPLATE_FILE).await
    }

    async fn save_template(&self, text: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.write_table(BROADCAST_TEMPLATE_FILE, text).await
    }
}

/// In-memory store used by tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<LedgerSnapshot>,
    template: Mutex<Option<String>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Creates a store that starts with the given state
    #[must_use]
    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Last saved state
    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.snapshot.lock().await.clone()
    }

    /// Number of `save` calls so far
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load(&self) -> Result<LedgerSnapshot, StorageError> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        *self.snapshot.lock().await = snapshot.clone();
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn load_template(&self) -> Result<Option<String>, StorageError> {
        Ok(self.template.lock().await.clone())
    }

    async fn save_template(&self, text: &str) -> Result<(), StorageError> {
        *self.template.lock().await = Some(text.to_string());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Table codecs
// ─────────────────────────────────────────────────────────────────────────────

/// Parses `id,i1,i2,...` lines; non-numeric indices are dropped
#[must_use]
pub fn parse_progress(contents: &str) -> BTreeMap<i64, Vec<usize>> {
    let mut table = BTreeMap::new();
    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((id, rest)) = line.split_once(',') else {
            warn!("Skipping progress line without indices: {line}");
            continue;
        };
        let Ok(user_id) = id.trim().parse::<i64>() else {
            warn!("Skipping progress line with bad user id: {line}");
            continue;
        };
        let indices = rest
            .split(',')
            .filter_map(|idx| idx.trim().parse::<usize>().ok())
            .collect();
        table.insert(user_id, indices);
    }
    table
}

/// Renders the progress table, one user per line
#[must_use]
pub fn render_progress(table: &BTreeMap<i64, Vec<usize>>) -> String {
    table
        .iter()
        .map(|(user_id, indices)| {
            let joined = indices
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            format!("{user_id},{joined}\n")
        })
        .collect()
}

/// Parses `id,expiry` lines where expiry is fractional unix seconds
#[must_use]
pub fn parse_bans(contents: &str) -> BTreeMap<i64, DateTime<Utc>> {
    let mut table = BTreeMap::new();
    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parts: Vec<&str> = line.split(',').collect();
        let [id, expiry] = parts.as_slice() else {
            warn!("Skipping malformed ban line: {line}");
            continue;
        };
        let parsed = id
            .trim()
            .parse::<i64>()
            .ok()
            .zip(expiry.trim().parse::<f64>().ok().and_then(from_unix_seconds));
        match parsed {
            Some((user_id, expiry)) => {
                table.insert(user_id, expiry);
            }
            None => warn!("Skipping ban line with bad values: {line}"),
        }
    }
    table
}

/// Renders the ban table with fractional unix seconds
#[must_use]
pub fn render_bans(table: &BTreeMap<i64, DateTime<Utc>>) -> String {
    table
        .iter()
        .map(|(user_id, expiry)| format!("{user_id},{}\n", to_unix_seconds(*expiry)))
        .collect()
}

/// Parses `id,status` lines, splitting at the first comma.
///
/// An unknown tag keeps the user registered with an empty status.
#[must_use]
pub fn parse_statuses(contents: &str) -> BTreeMap<i64, Status> {
    let mut table = BTreeMap::new();
    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((id, tag)) = line.split_once(',') else {
            warn!("Skipping status line without separator: {line}");
            continue;
        };
        let Ok(user_id) = id.trim().parse::<i64>() else {
            warn!("Skipping status line with bad user id: {line}");
            continue;
        };
        let status = Status::from_tag(tag.trim()).unwrap_or_else(|| {
            warn!("Unknown status tag for user {user_id}, treating as empty: {line}");
            Status::None
        });
        table.insert(user_id, status);
    }
    table
}

/// Renders the status table
#[must_use]
pub fn render_statuses(table: &BTreeMap<i64, Status>) -> String {
    table
        .iter()
        .map(|(user_id, status)| format!("{user_id},{}\n", status.as_tag()))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn to_unix_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

#[allow(clippy::cast_possible_truncation)]
fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}
