//! Column kinds and descriptors.
//!
//! A column is one of a closed set of kinds. Each kind has a fixed layout:
//!
//! - **Serial**: the row-number column. Never editable, never holds a value.
//! - **Singleton**: exactly one column of this kind per section (e.g. `isPatient`).
//! - **ArrayGroup**: a repeating group whose size changes as users insert or
//!   delete columns (e.g. clinical symptoms). Members carry a `cell_index`.

use serde::{Deserialize, Serialize};

/// How columns of a kind are laid out in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnLayout {
    Serial,
    Singleton,
    ArrayGroup,
}

/// Every kind of column the case grid knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    /// Row number.
    Serial,
    /// Patient flag (0/1).
    IsPatient,
    /// Basic demographics (age, sex, ...). Repeating group.
    Basic,
    /// Clinical symptoms. Repeating group.
    Clinical,
    /// Symptom onset date-time.
    SymptomOnset,
    /// Individual exposure date-time.
    IndividualExposureTime,
    /// Confirmed case flag.
    ConfirmedCase,
    /// Diet / food exposure items. Repeating group.
    Diet,
}

impl ColumnType {
    pub const ALL: [ColumnType; 8] = [
        ColumnType::Serial,
        ColumnType::IsPatient,
        ColumnType::Basic,
        ColumnType::Clinical,
        ColumnType::SymptomOnset,
        ColumnType::IndividualExposureTime,
        ColumnType::ConfirmedCase,
        ColumnType::Diet,
    ];

    pub fn layout(self) -> ColumnLayout {
        match self {
            ColumnType::Serial => ColumnLayout::Serial,
            ColumnType::IsPatient
            | ColumnType::SymptomOnset
            | ColumnType::IndividualExposureTime
            | ColumnType::ConfirmedCase => ColumnLayout::Singleton,
            ColumnType::Basic | ColumnType::Clinical | ColumnType::Diet => ColumnLayout::ArrayGroup,
        }
    }

    /// Wire name of the kind. Also the fixed identity literal for singletons.
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Serial => "serial",
            ColumnType::IsPatient => "isPatient",
            ColumnType::Basic => "basic",
            ColumnType::Clinical => "clinical",
            ColumnType::SymptomOnset => "symptomOnset",
            ColumnType::IndividualExposureTime => "individualExposureTime",
            ColumnType::ConfirmedCase => "confirmedCase",
            ColumnType::Diet => "diet",
        }
    }

    /// Parse a wire name (as produced by `as_str`).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// The row field that stores values of this kind unless a descriptor
    /// overrides it.
    pub fn default_data_key(self) -> &'static str {
        match self {
            ColumnType::Serial => "serial",
            ColumnType::IsPatient => "isPatient",
            ColumnType::Basic => "basicInfo",
            ColumnType::Clinical => "clinicalSymptoms",
            ColumnType::SymptomOnset => "symptomOnset",
            ColumnType::IndividualExposureTime => "individualExposureTime",
            ColumnType::ConfirmedCase => "confirmedCase",
            ColumnType::Diet => "dietInfo",
        }
    }

    pub fn is_array_group(self) -> bool {
        self.layout() == ColumnLayout::ArrayGroup
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_editable() -> bool {
    true
}

/// One rendered column.
///
/// Descriptors are rebuilt wholesale whenever the schema changes; `col_index`
/// is only meaningful for the schema the descriptor was built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub data_key: String,
    /// Position within a repeating group. `None` for serial and singleton kinds.
    #[serde(default)]
    pub cell_index: Option<usize>,
    /// Rendered position. Volatile.
    #[serde(default)]
    pub col_index: usize,
    /// Disambiguates same-kind columns of different logical sections.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_editable")]
    pub is_editable: bool,
}

impl ColumnDescriptor {
    /// The row-number column.
    pub fn serial() -> Self {
        Self {
            column_type: ColumnType::Serial,
            data_key: ColumnType::Serial.default_data_key().to_string(),
            cell_index: None,
            col_index: 0,
            group: None,
            is_editable: false,
        }
    }

    /// A singleton column of the given kind.
    pub fn singleton(column_type: ColumnType) -> Self {
        Self {
            column_type,
            data_key: column_type.default_data_key().to_string(),
            cell_index: None,
            col_index: 0,
            group: None,
            is_editable: true,
        }
    }

    /// A member of a repeating group.
    pub fn group_member(column_type: ColumnType, cell_index: usize) -> Self {
        Self {
            column_type,
            data_key: column_type.default_data_key().to_string(),
            cell_index: Some(cell_index),
            col_index: 0,
            group: None,
            is_editable: true,
        }
    }

    pub fn with_data_key(mut self, data_key: impl Into<String>) -> Self {
        self.data_key = data_key.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.is_editable = false;
        self
    }

    pub fn layout(&self) -> ColumnLayout {
        self.column_type.layout()
    }

    /// Whether values typed into this column are validated.
    pub fn accepts_input(&self) -> bool {
        self.is_editable && self.layout() != ColumnLayout::Serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts() {
        assert_eq!(ColumnType::Serial.layout(), ColumnLayout::Serial);
        assert_eq!(ColumnType::IsPatient.layout(), ColumnLayout::Singleton);
        assert_eq!(ColumnType::Clinical.layout(), ColumnLayout::ArrayGroup);
        assert!(ColumnType::Diet.is_array_group());
        assert!(!ColumnType::ConfirmedCase.is_array_group());
    }

    #[test]
    fn test_type_names_roundtrip() {
        for t in ColumnType::ALL {
            assert_eq!(ColumnType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ColumnType::parse("nope"), None);
    }

    #[test]
    fn test_serde_wire_names() {
        let col = ColumnDescriptor::group_member(ColumnType::Clinical, 2).with_group("fever");
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["type"], "clinical");
        assert_eq!(json["dataKey"], "clinicalSymptoms");
        assert_eq!(json["cellIndex"], 2);
        assert_eq!(json["group"], "fever");

        // Missing optional fields fall back to defaults
        let parsed: ColumnDescriptor =
            serde_json::from_str(r#"{"type":"isPatient","dataKey":"isPatient"}"#).unwrap();
        assert_eq!(parsed.cell_index, None);
        assert!(parsed.is_editable);
    }

    #[test]
    fn test_serial_is_read_only() {
        let serial = ColumnDescriptor::serial();
        assert!(!serial.is_editable);
        assert_eq!(serial.layout(), ColumnLayout::Serial);
        assert!(!serial.accepts_input());
    }

    #[test]
    fn test_read_only_columns_do_not_accept_input() {
        let column = ColumnDescriptor::singleton(ColumnType::IsPatient);
        assert!(column.accepts_input());
        assert!(!column.read_only().accepts_input());
    }
}
