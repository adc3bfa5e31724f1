//! Default rule table for headless validation.

use casegrid_core::{is_blank, ColumnType};
use casegrid_engine::{RuleError, RuleSet, Verdict};
use chrono::NaiveDateTime;

/// Date-time layout for onset and exposure columns.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRules;

impl RuleSet for DefaultRules {
    fn evaluate(&self, value: &str, column_type: ColumnType) -> Result<Verdict, RuleError> {
        if is_blank(value) {
            return Ok(Verdict::valid());
        }
        let value = value.trim();
        let verdict = match column_type {
            ColumnType::Serial | ColumnType::Basic => Verdict::valid(),
            ColumnType::IsPatient
            | ColumnType::ConfirmedCase
            | ColumnType::Clinical
            | ColumnType::Diet => binary(value),
            ColumnType::SymptomOnset | ColumnType::IndividualExposureTime => datetime(value),
        };
        Ok(verdict)
    }
}

fn binary(value: &str) -> Verdict {
    match value {
        "0" | "1" => Verdict::valid(),
        _ => Verdict::invalid("Only 0 or 1 can be entered."),
    }
}

fn datetime(value: &str) -> Verdict {
    match NaiveDateTime::parse_from_str(value, DATETIME_FORMAT) {
        Ok(_) => Verdict::valid(),
        Err(_) => Verdict::invalid("Use the format YYYY-MM-DD HH:MM."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(value: &str, t: ColumnType) -> bool {
        DefaultRules.evaluate(value, t).unwrap().valid
    }

    #[test]
    fn test_binary_columns() {
        for t in [ColumnType::IsPatient, ColumnType::ConfirmedCase, ColumnType::Clinical, ColumnType::Diet] {
            assert!(check("0", t));
            assert!(check(" 1 ", t));
            assert!(check("", t));
            assert!(!check("2", t));
            assert!(!check("yes", t));
        }
    }

    #[test]
    fn test_datetime_columns() {
        assert!(check("2024-03-01 09:30", ColumnType::SymptomOnset));
        assert!(!check("2024-03-01", ColumnType::SymptomOnset));
        assert!(!check("2024-13-01 09:30", ColumnType::IndividualExposureTime));
        assert!(check("   ", ColumnType::IndividualExposureTime));
    }

    #[test]
    fn test_free_text_columns() {
        assert!(check("anything", ColumnType::Basic));
        assert!(check("42", ColumnType::Serial));
    }
}
