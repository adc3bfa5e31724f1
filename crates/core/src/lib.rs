//! `casegrid-core`: shared data model for the case grid.
//!
//! Columns are described by a closed set of kinds; rows are plain ordered
//! records keyed by each column's `data_key`. Nothing here knows about errors.

pub mod column;
pub mod row;

pub use column::{ColumnDescriptor, ColumnLayout, ColumnType};
pub use row::{is_blank, CaseRow, FieldValue};
