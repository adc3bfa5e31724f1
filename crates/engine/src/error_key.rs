//! Column identity and error keys.
//!
//! A column's `UniqueKey` is derived from `(data_key, type, cell_index, group)`
//! and survives reordering. An error key pairs a row index with a column
//! reference and is written as `"{row}_{unique_key}"`.
//!
//! ## Key versions
//!
//! - **Current**: `"{row}_{unique_key}"`, e.g. `3_clinicalSymptoms.2`.
//! - **Legacy**: `"{row}_{col_index}"`, e.g. `3_7`. Still accepted when parsing
//!   persisted maps; never produced. Legacy keys are upgraded to the current
//!   form as soon as a schema is available to resolve `col_index`.
//!
//! A unique key is never all digits, which keeps the two forms unambiguous.

use std::fmt;
use std::str::FromStr;

use casegrid_core::{ColumnDescriptor, ColumnLayout};
use serde::{Deserialize, Serialize};

/// Separator between a group's base name and the member position.
const CELL_INDEX_SEP: char = '.';
/// Separator between a base name and the section group.
const GROUP_SEP: char = '@';
/// Separator between row and column in an error key.
const ROW_SEP: char = '_';

/// Durable column identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueKey(String);

impl UniqueKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The group position encoded in the key, if it has one.
    pub fn cell_index(&self) -> Option<usize> {
        let (_, tail) = self.0.rsplit_once(CELL_INDEX_SEP)?;
        if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        tail.parse().ok()
    }

    fn is_well_formed(s: &str) -> bool {
        !s.is_empty() && !s.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the durable identity of a column. Total over every descriptor.
pub fn compute_unique_key(column: &ColumnDescriptor) -> UniqueKey {
    let mut key = match column.layout() {
        ColumnLayout::Serial | ColumnLayout::Singleton => column.column_type.as_str().to_string(),
        ColumnLayout::ArrayGroup => {
            if column.data_key.is_empty() {
                column.column_type.as_str().to_string()
            } else {
                column.data_key.clone()
            }
        }
    };
    if let Some(group) = &column.group {
        key.push(GROUP_SEP);
        key.push_str(group);
    }
    if column.layout() == ColumnLayout::ArrayGroup {
        if let Some(idx) = column.cell_index {
            key.push(CELL_INDEX_SEP);
            key.push_str(&idx.to_string());
        }
    }
    UniqueKey(key)
}

/// Which column an error key points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnRef {
    /// Durable identity (current format).
    Unique(UniqueKey),
    /// Rendered position at the time the key was written (legacy format).
    Legacy(usize),
}

/// A parsed error key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ErrorKey {
    pub row: usize,
    pub column: ColumnRef,
}

impl ErrorKey {
    pub fn new(row: usize, key: UniqueKey) -> Self {
        Self { row, column: ColumnRef::Unique(key) }
    }

    pub fn legacy(row: usize, col_index: usize) -> Self {
        Self { row, column: ColumnRef::Legacy(col_index) }
    }

    /// Same column, different row.
    pub fn with_row(&self, row: usize) -> Self {
        Self { row, column: self.column.clone() }
    }

    pub fn unique_key(&self) -> Option<&UniqueKey> {
        match &self.column {
            ColumnRef::Unique(k) => Some(k),
            ColumnRef::Legacy(_) => None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self.column, ColumnRef::Legacy(_))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Unique(k) => write!(f, "{}", k),
            ColumnRef::Legacy(col) => write!(f, "{}", col),
        }
    }
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ROW_SEP}{}", self.row, self.column)
    }
}

/// Error returned when a string is not an error key in either format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedKey(pub String);

impl fmt::Display for MalformedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed error key '{}'", self.0)
    }
}

impl std::error::Error for MalformedKey {}

impl FromStr for ErrorKey {
    type Err = MalformedKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_key(s).ok_or_else(|| MalformedKey(s.to_string()))
    }
}

impl TryFrom<String> for ErrorKey {
    type Error = MalformedKey;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ErrorKey> for String {
    fn from(key: ErrorKey) -> Self {
        key.to_string()
    }
}

/// Compose the current-format key string for a cell.
pub fn compose_key(row: usize, key: &UniqueKey) -> String {
    format!("{row}{ROW_SEP}{key}")
}

/// Parse either key format. `None` only for malformed input.
pub fn parse_key(s: &str) -> Option<ErrorKey> {
    let (row, rest) = s.split_once(ROW_SEP)?;
    if row.is_empty() || !row.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let row: usize = row.parse().ok()?;
    if rest.is_empty() {
        return None;
    }
    if rest.bytes().all(|b| b.is_ascii_digit()) {
        let col: usize = rest.parse().ok()?;
        return Some(ErrorKey::legacy(row, col));
    }
    if !UniqueKey::is_well_formed(rest) {
        return None;
    }
    Some(ErrorKey::new(row, UniqueKey(rest.to_string())))
}
