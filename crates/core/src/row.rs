//! Case rows.
//!
//! A row is a plain record with no identity of its own: singleton columns read
//! a text field, group columns read one entry of a list field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::column::{ColumnDescriptor, ColumnLayout};

/// True when a value is empty after trimming whitespace.
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// The stored value of one row field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

/// One case record, keyed by column `data_key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseRow {
    fields: BTreeMap<String, FieldValue>,
}

impl CaseRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a text field.
    pub fn with_text(mut self, data_key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_text(data_key, value);
        self
    }

    /// Builder: set a list field.
    pub fn with_list<I, S>(mut self, data_key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.insert(
            data_key.into(),
            FieldValue::List(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn set_text(&mut self, data_key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(data_key.into(), FieldValue::Text(value.into()));
    }

    /// Set one entry of a list field, growing the list with empty entries if needed.
    /// A text field under the same key is replaced by a list.
    pub fn set_list_item(&mut self, data_key: impl Into<String>, index: usize, value: impl Into<String>) {
        let entry = self
            .fields
            .entry(data_key.into())
            .or_insert_with(|| FieldValue::List(Vec::new()));
        if let FieldValue::Text(_) = entry {
            *entry = FieldValue::List(Vec::new());
        }
        if let FieldValue::List(items) = entry {
            if items.len() <= index {
                items.resize(index + 1, String::new());
            }
            items[index] = value.into();
        }
    }

    /// Insert `count` empty entries at `position` of a list field.
    pub fn insert_list_items(&mut self, data_key: &str, position: usize, count: usize) {
        if let Some(FieldValue::List(items)) = self.fields.get_mut(data_key) {
            let at = position.min(items.len());
            for _ in 0..count {
                items.insert(at, String::new());
            }
        }
    }

    /// Remove the entries at `indices` from a list field. Out-of-range indices are ignored.
    pub fn remove_list_items(&mut self, data_key: &str, indices: &[usize]) {
        if let Some(FieldValue::List(items)) = self.fields.get_mut(data_key) {
            let mut i = 0;
            items.retain(|_| {
                let keep = !indices.contains(&i);
                i += 1;
                keep
            });
        }
    }

    pub fn field(&self, data_key: &str) -> Option<&FieldValue> {
        self.fields.get(data_key)
    }

    /// The value this row holds for `column`, if any.
    pub fn value(&self, column: &ColumnDescriptor) -> Option<&str> {
        match column.layout() {
            ColumnLayout::Serial => None,
            ColumnLayout::Singleton => match self.fields.get(&column.data_key)? {
                FieldValue::Text(s) => Some(s.as_str()),
                FieldValue::List(_) => None,
            },
            ColumnLayout::ArrayGroup => match self.fields.get(&column.data_key)? {
                FieldValue::List(items) => items.get(column.cell_index?).map(String::as_str),
                FieldValue::Text(_) => None,
            },
        }
    }

    /// True when the row holds a non-blank value for `column`.
    pub fn has_value(&self, column: &ColumnDescriptor) -> bool {
        self.value(column).is_some_and(|v| !is_blank(v))
    }
}
