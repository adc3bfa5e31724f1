//! Indexed column schema.
//!
//! Built once per schema version and never mutated. Lookups by rendered
//! position, by unique key, and by the relaxed `(type, cell_index)` slot are O(1).

use std::collections::BTreeMap;

use casegrid_core::{ColumnDescriptor, ColumnLayout, ColumnType};
use rustc_hash::FxHashMap;

use crate::error_key::{compute_unique_key, ColumnRef, ErrorKey, UniqueKey};

/// A repeating group: every column of one kind within one section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId {
    pub column_type: ColumnType,
    pub group: Option<String>,
}

impl GroupId {
    pub fn new(column_type: ColumnType) -> Self {
        Self { column_type, group: None }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn of(column: &ColumnDescriptor) -> Self {
        Self {
            column_type: column.column_type,
            group: column.group.clone(),
        }
    }

    pub fn contains(&self, column: &ColumnDescriptor) -> bool {
        column.column_type == self.column_type && column.group == self.group
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColumnSchema {
    columns: Vec<ColumnDescriptor>,
    keys: Vec<UniqueKey>,
    by_key: FxHashMap<UniqueKey, usize>,
    /// First column for each `(type, cell_index)`, ignoring group and data key.
    by_slot: FxHashMap<(ColumnType, usize), usize>,
}

impl ColumnSchema {
    /// Index a column list. `col_index` is reassigned from list position.
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        let mut columns = columns;
        let mut keys = Vec::with_capacity(columns.len());
        let mut by_key = FxHashMap::default();
        let mut by_slot = FxHashMap::default();

        for (pos, col) in columns.iter_mut().enumerate() {
            col.col_index = pos;
            let key = compute_unique_key(col);
            if by_key.insert(key.clone(), pos).is_some() {
                log::warn!("duplicate column identity '{}' at position {}", key, pos);
            }
            if col.layout() == ColumnLayout::ArrayGroup {
                if let Some(idx) = col.cell_index {
                    by_slot.entry((col.column_type, idx)).or_insert(pos);
                }
            }
            keys.push(key);
        }

        Self { columns, keys, by_key, by_slot }
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column at a rendered position.
    pub fn column(&self, col_index: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(col_index)
    }

    /// Identity of the column at a rendered position.
    pub fn unique_key(&self, col_index: usize) -> Option<&UniqueKey> {
        self.keys.get(col_index)
    }

    pub fn position_of(&self, key: &UniqueKey) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    pub fn resolve(&self, key: &UniqueKey) -> Option<&ColumnDescriptor> {
        self.position_of(key).map(|pos| &self.columns[pos])
    }

    /// Relaxed lookup by kind and group position only.
    pub fn resolve_slot(&self, column_type: ColumnType, cell_index: usize) -> Option<&ColumnDescriptor> {
        self.by_slot
            .get(&(column_type, cell_index))
            .map(|&pos| &self.columns[pos])
    }

    /// Resolve the column an error key points at in this schema.
    pub fn resolve_key(&self, key: &ErrorKey) -> Option<(&ColumnDescriptor, &UniqueKey)> {
        let pos = match &key.column {
            ColumnRef::Unique(k) => self.position_of(k)?,
            ColumnRef::Legacy(col) => *col,
        };
        Some((self.columns.get(pos)?, self.keys.get(pos)?))
    }

    /// Number of array-group members per group.
    pub fn group_sizes(&self) -> BTreeMap<GroupId, usize> {
        let mut sizes = BTreeMap::new();
        for col in &self.columns {
            if col.layout() == ColumnLayout::ArrayGroup {
                *sizes.entry(GroupId::of(col)).or_insert(0) += 1;
            }
        }
        sizes
    }

    pub fn has_same_columns(&self, other: &ColumnSchema) -> bool {
        self.columns == other.columns
    }
}

impl PartialEq for ColumnSchema {
    fn eq(&self, other: &Self) -> bool {
        self.has_same_columns(other)
    }
}

impl Eq for ColumnSchema {}
