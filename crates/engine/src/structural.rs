//! Structural remapping after column insertions and deletions.
//!
//! When columns are inserted into or deleted from a repeating group, every
//! member after the edit point changes `cell_index`, and with it its
//! `UniqueKey`. This module carries each stored error to its column's new
//! identity, or drops it when its column is gone.
//!
//! ## Algorithm
//!
//! 1. Compare group sizes between the old and new schema. A grown group is an
//!    insertion, a shrunk group a deletion. Positions come from the caller's
//!    hint when one is supplied; otherwise the edit is assumed at the tail.
//! 2. Columns whose `(type, cell_index, group)` is unchanged map directly.
//! 3. Errors in an edited group get their `cell_index` shifted (or are dropped
//!    when their column was deleted), then resolve by recomposed key, falling
//!    back to a `(type, cell_index)` match.
//! 4. An error whose destination cell is now blank is dropped rather than left
//!    as a ghost on an unrelated cell.
//!
//! An unchanged schema with no edits is a no-op.

use casegrid_core::{CaseRow, ColumnLayout, ColumnType};
use rustc_hash::FxHashMap;

use crate::error_key::{compute_unique_key, ColumnRef, ErrorKey, UniqueKey};
use crate::error_store::{ErrorRecord, ErrorSet, ErrorStore};
use crate::schema::{ColumnSchema, GroupId};

/// Columns inserted into or deleted from one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEdit {
    pub group: GroupId,
    /// First affected `cell_index` (in the old group's numbering).
    pub position: usize,
    pub count: usize,
}

impl GroupEdit {
    fn covers(&self, cell_index: usize) -> bool {
        cell_index >= self.position && cell_index < self.position + self.count
    }
}

/// The caller's account of what it just did to the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnEditHint {
    /// Columns were inserted into `group` starting at `position`.
    Inserted { group: GroupId, position: usize },
    /// The members at `cell_indices` were deleted from `group`.
    Deleted { group: GroupId, cell_indices: Vec<usize> },
}

impl ColumnEditHint {
    fn group(&self) -> &GroupId {
        match self {
            Self::Inserted { group, .. } | Self::Deleted { group, .. } => group,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralChange {
    pub insertions: Vec<GroupEdit>,
    pub deletions: Vec<GroupEdit>,
}

impl StructuralChange {
    /// Derive the group edits between two schemas.
    pub fn detect(old: &ColumnSchema, new: &ColumnSchema, hint: Option<&ColumnEditHint>) -> Self {
        let old_sizes = old.group_sizes();
        let new_sizes = new.group_sizes();
        let mut change = Self::default();

        let mut groups: Vec<&GroupId> = old_sizes.keys().chain(new_sizes.keys()).collect();
        groups.sort();
        groups.dedup();

        for group in groups {
            let old_n = old_sizes.get(group).copied().unwrap_or(0);
            let new_n = new_sizes.get(group).copied().unwrap_or(0);
            let group_hint = hint.filter(|h| h.group() == group);

            if new_n > old_n {
                let count = new_n - old_n;
                let position = match group_hint {
                    Some(ColumnEditHint::Inserted { position, .. }) => (*position).min(old_n),
                    _ => old_n,
                };
                change.insertions.push(GroupEdit { group: group.clone(), position, count });
            } else if new_n < old_n {
                let count = old_n - new_n;
                change.deletions.extend(deletion_runs(group, old_n, count, group_hint));
            }
        }

        if let Some(h) = hint {
            if !change.touches(h.group()) {
                log::debug!("column edit hint for {:?} matches no group size change", h.group());
            }
        }
        change
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty()
    }

    pub fn touches(&self, group: &GroupId) -> bool {
        self.insertions.iter().chain(&self.deletions).any(|e| &e.group == group)
    }

    /// New `cell_index` for a member of `group`, or `None` if it was deleted.
    pub fn adjust_cell_index(&self, group: &GroupId, cell_index: usize) -> Option<usize> {
        let mut shift_down = 0;
        for edit in self.deletions.iter().filter(|e| &e.group == group) {
            if edit.covers(cell_index) {
                return None;
            }
            if cell_index >= edit.position + edit.count {
                shift_down += edit.count;
            }
        }
        let mut adjusted = cell_index - shift_down;
        for edit in self.insertions.iter().filter(|e| &e.group == group) {
            if cell_index >= edit.position {
                adjusted += edit.count;
            }
        }
        Some(adjusted)
    }
}

/// Turn a deletion into contiguous runs, using the hint when it is consistent.
fn deletion_runs(
    group: &GroupId,
    old_n: usize,
    count: usize,
    hint: Option<&ColumnEditHint>,
) -> Vec<GroupEdit> {
    let tail = || {
        vec![GroupEdit {
            group: group.clone(),
            position: old_n - count,
            count,
        }]
    };

    let Some(ColumnEditHint::Deleted { cell_indices, .. }) = hint else {
        return tail();
    };
    let mut indices: Vec<usize> = cell_indices.iter().copied().filter(|&i| i < old_n).collect();
    indices.sort_unstable();
    indices.dedup();
    if indices.len() != count {
        log::warn!(
            "deletion hint lists {} column(s) but group {:?} shrank by {}; assuming tail deletion",
            indices.len(),
            group,
            count
        );
        return tail();
    }

    let mut runs: Vec<GroupEdit> = Vec::new();
    for idx in indices {
        match runs.last_mut() {
            Some(run) if run.position + run.count == idx => run.count += 1,
            _ => runs.push(GroupEdit { group: group.clone(), position: idx, count: 1 }),
        }
    }
    runs
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapStats {
    /// Errors whose key did not change.
    pub kept: usize,
    /// Errors carried to a new key.
    pub moved: usize,
    /// Errors discarded (column gone, blank destination, or collision).
    pub dropped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Remapped {
    pub errors: ErrorSet,
    pub stats: RemapStats,
}

/// Map from old column identity to new schema position for every column whose
/// `(type, cell_index, group)` appears in both schemas.
fn identity_map(old: &ColumnSchema, new: &ColumnSchema) -> FxHashMap<UniqueKey, usize> {
    type Slot<'a> = (ColumnType, Option<usize>, Option<&'a str>);

    let mut new_slots: FxHashMap<Slot<'_>, usize> = FxHashMap::default();
    for col in new.columns() {
        new_slots
            .entry((col.column_type, col.cell_index, col.group.as_deref()))
            .or_insert(col.col_index);
    }

    let mut map = FxHashMap::default();
    for col in old.columns() {
        if let Some(&pos) = new_slots.get(&(col.column_type, col.cell_index, col.group.as_deref())) {
            if let Some(key) = old.unique_key(col.col_index) {
                map.insert(key.clone(), pos);
            }
        }
    }
    map
}

/// New schema position for the column an error key pointed at, if it survives.
fn remap_column(
    key: &ErrorKey,
    old: &ColumnSchema,
    new: &ColumnSchema,
    change: &StructuralChange,
    identity: &FxHashMap<UniqueKey, usize>,
) -> Option<usize> {
    let old_key = match &key.column {
        ColumnRef::Unique(k) => k.clone(),
        ColumnRef::Legacy(col) => old.unique_key(*col)?.clone(),
    };

    let Some(old_col) = old.resolve(&old_key) else {
        // Unknown to the old schema: survives only under an identical identity
        return new.position_of(&old_key);
    };

    let group = GroupId::of(old_col);
    match old_col.layout() {
        ColumnLayout::Serial => None,
        ColumnLayout::ArrayGroup if change.touches(&group) => {
            let adjusted = change.adjust_cell_index(&group, old_col.cell_index?)?;
            let mut candidate = old_col.clone();
            candidate.cell_index = Some(adjusted);
            new.position_of(&compute_unique_key(&candidate)).or_else(|| {
                new.resolve_slot(old_col.column_type, adjusted)
                    .map(|c| c.col_index)
            })
        }
        ColumnLayout::ArrayGroup | ColumnLayout::Singleton => identity
            .get(&old_key)
            .copied()
            .or_else(|| new.position_of(&old_key)),
    }
}

/// Carry every error from `old` to `new` identities. Pure.
pub fn remap_errors(
    errors: &ErrorSet,
    old: &ColumnSchema,
    new: &ColumnSchema,
    change: &StructuralChange,
    rows: &[CaseRow],
) -> Remapped {
    if change.is_empty() && old == new {
        return Remapped {
            errors: errors.clone(),
            stats: RemapStats { kept: errors.len(), ..Default::default() },
        };
    }

    let identity = identity_map(old, new);
    let mut stats = RemapStats::default();
    let mut out = ErrorSet::default();

    // Deterministic order so collisions resolve the same way every time
    let mut ordered: Vec<(&ErrorKey, &ErrorRecord)> = errors.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    for (key, record) in ordered {
        let Some(pos) = remap_column(key, old, new, change, &identity) else {
            stats.dropped += 1;
            continue;
        };
        let (Some(column), Some(target)) = (new.column(pos), new.unique_key(pos)) else {
            stats.dropped += 1;
            continue;
        };
        let holds_value = rows.get(key.row).is_some_and(|row| row.has_value(column));
        if !holds_value {
            stats.dropped += 1;
            continue;
        }

        let new_key = ErrorKey::new(key.row, target.clone());
        if out.contains_key(&new_key) {
            stats.dropped += 1;
            continue;
        }
        if &new_key == key {
            stats.kept += 1;
        } else {
            stats.moved += 1;
        }
        out.insert(new_key, record.clone());
    }

    Remapped { errors: out, stats }
}

/// Detect the change between two schemas and remap the store in one step.
pub fn apply_structural_change(
    store: &mut ErrorStore,
    old: &ColumnSchema,
    new: &ColumnSchema,
    hint: Option<&ColumnEditHint>,
    rows: &[CaseRow],
) -> RemapStats {
    let change = StructuralChange::detect(old, new, hint);
    if change.is_empty() && old == new {
        return RemapStats { kept: store.len(), ..Default::default() };
    }
    let remapped = remap_errors(store.errors(), old, new, &change, rows);
    log::debug!(
        "structural remap: {} kept, {} moved, {} dropped",
        remapped.stats.kept,
        remapped.stats.moved,
        remapped.stats.dropped
    );
    store.bulk_replace(remapped.errors);
    remapped.stats
}
