//! Read access to the host's grid.

use casegrid_core::{CaseRow, ColumnDescriptor};

use crate::history::GridState;

/// The data store the engine validates against. The engine never writes rows.
pub trait GridSource {
    fn rows(&self) -> &[CaseRow];

    fn column_schema(&self) -> &[ColumnDescriptor];

    fn cell_value(&self, row: usize, column: &ColumnDescriptor) -> Option<&str> {
        self.rows().get(row).and_then(|r| r.value(column))
    }

    fn row_count(&self) -> usize {
        self.rows().len()
    }
}

impl GridSource for GridState {
    fn rows(&self) -> &[CaseRow] {
        &self.rows
    }

    fn column_schema(&self) -> &[ColumnDescriptor] {
        &self.columns
    }
}
