//! Ranked club catalog
//!
//! The catalog is built once from the scraper's spreadsheet and then only
//! read. Groups keep their position for the lifetime of the catalog, so a
//! user's cursor is a plain index into it.

use calamine::{open_workbook_auto, Data, Reader};
use std::cmp::Reverse;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while reading the ranked source
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The spreadsheet could not be opened or parsed
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),
    /// The workbook has no worksheet to read
    #[error("Spreadsheet {0} has no worksheets")]
    NoWorksheet(String),
}

/// One club with its activity score
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClubEntry {
    /// Club URL
    pub identity: String,
    /// Number of recently active admins
    pub weight: i64,
}

impl ClubEntry {
    /// Creates an entry
    #[must_use]
    pub fn new(identity: impl Into<String>, weight: i64) -> Self {
        Self {
            identity: identity.into(),
            weight,
        }
    }
}

impl fmt::Display for ClubEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} активных админов)", self.identity, self.weight)
    }
}

/// A unit handed to one user per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Clubs in this group, strongest first
    pub members: Vec<ClubEntry>,
}

impl Group {
    /// Group holding a single club
    #[must_use]
    pub fn single(entry: ClubEntry) -> Self {
        Self {
            members: vec![entry],
        }
    }

    /// Text shown to the user receiving this group
    #[must_use]
    pub fn describe(&self) -> String {
        self.members
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Ordered, immutable sequence of groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    groups: Vec<Group>,
}

impl Catalog {
    /// Sorts entries by descending weight and wraps each in its own group.
    ///
    /// The sort is stable: entries with equal weight keep their input order.
    ///
    /// # Examples
    ///
    /// ```
    /// use club_relay_bot::catalog::{Catalog, ClubEntry};
    ///
    /// let catalog = Catalog::build(vec![
    ///     ClubEntry::new("C", 2),
    ///     ClubEntry::new("A", 10),
    ///     ClubEntry::new("B", 7),
    /// ]);
    /// let order: Vec<_> = catalog
    ///     .groups()
    ///     .iter()
    ///     .map(|g| g.members[0].identity.as_str())
    ///     .collect();
    /// assert_eq!(order, ["A", "B", "C"]);
    /// ```
    #[must_use]
    pub fn build(mut entries: Vec<ClubEntry>) -> Self {
        entries.sort_by_key(|entry| Reverse(entry.weight));
        Self {
            groups: entries.into_iter().map(Group::single).collect(),
        }
    }

    /// Number of groups
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True until the first successful build
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Group> {
        self.groups.get(index)
    }

    /// All groups in distribution order
    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }
}

/// Reads `(identity, weight)` pairs from the first worksheet.
///
/// Row 1 is a header. The identity is column A, the weight sits in
/// `weight_column` (zero-based). Rows without an identity are skipped;
/// a missing or non-numeric weight counts as zero.
///
/// # Errors
///
/// Returns an error if the workbook cannot be opened or has no sheets.
pub fn load_ranked_source(
    path: &Path,
    weight_column: usize,
) -> Result<Vec<ClubEntry>, CatalogError> {
    info!("Reading ranked clubs from {}", path.display());
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| CatalogError::NoWorksheet(path.display().to_string()))??;

    let mut entries = Vec::new();
    for (row_no, row) in range.rows().enumerate().skip(1) {
        let identity = row.first().map(cell_text).unwrap_or_default();
        if identity.is_empty() {
            warn!("Skipping row {} without a club URL", row_no + 1);
            continue;
        }
        let weight = row.get(weight_column).map_or(0, cell_weight);
        entries.push(ClubEntry { identity, weight });
    }

    info!("Read {} clubs", entries.len());
    Ok(entries)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cell_weight(cell: &Data) -> i64 {
    match cell {
        Data::Int(n) => *n,
        Data::Float(f) if f.is_finite() => f.round() as i64,
        Data::String(s) => s.trim().parse().unwrap_or(0),
        Data::Bool(b) => i64::from(*b),
        _ => 0,
    }
}
