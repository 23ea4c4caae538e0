//! Raw registry records.
//!
//! A [`RawRecord`] is one row of the primary registry table, keyed by the
//! legacy field codes, with the secondary goods text and the scanned image
//! fields merged in.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::ClassificationError;
use crate::value::FieldValue;

/// Source field codes the engine itself reads.
pub mod fields {
    pub const SERIAL: &str = "NSER";
    pub const REG_NUMBER: &str = "NTM";
    pub const INTERNATIONAL: &str = "IS";
    pub const APPELLATION: &str = "WCD";
    pub const APPLICATION_DATE: &str = "DAP";
    pub const HOLDER: &str = "OWN";
    pub const REPRESENTATIVE: &str = "NPP";
    pub const GOODS: &str = "GOODS";
    pub const IMAGE_PATH: &str = "IMAGE_PATH";
    pub const IMAGE_NAME: &str = "IMAGE_NAME";
    pub const IMAGE_TYPE: &str = "IMAGE_TYPE";
}

/// Serial number of a registry record (`NSER`), the migration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SerialNumber(pub i64);

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SerialNumber {
    /// Read a serial from an integer or numeric text value.
    pub fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int(i) => Some(SerialNumber(*i)),
            FieldValue::Text(s) => s.trim().parse().ok().map(SerialNumber),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawRecord {
    fields: IndexMap<String, FieldValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_text(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_value(key, FieldValue::Text(value.into()))
    }

    /// Build a record from one NDJSON object, typing every value once.
    pub fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let fields = map
            .into_iter()
            .map(|(k, v)| (k, FieldValue::from_json(v)))
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// True when the field exists and is neither null nor blank text.
    pub fn has_value(&self, key: &str) -> bool {
        self.get(key).map_or(false, |v| !v.is_blank())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn serial(&self) -> Result<SerialNumber, ClassificationError> {
        let value = self
            .get(fields::SERIAL)
            .ok_or(ClassificationError::MissingField(fields::SERIAL))?;
        SerialNumber::from_value(value).ok_or_else(|| ClassificationError::InvalidField {
            field: fields::SERIAL,
            reason: format!("'{}' is not a serial number", value),
        })
    }

    /// Collapse runs of whitespace in a text field to single spaces.
    pub fn collapse_whitespace(&mut self, key: &str) {
        if let Some(FieldValue::Text(text)) = self.fields.get_mut(key) {
            *text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_from_int_and_text() {
        let record = RawRecord::new().with_value(fields::SERIAL, FieldValue::Int(501));
        assert_eq!(record.serial().unwrap(), SerialNumber(501));

        let record = RawRecord::new().with_text(fields::SERIAL, " 77 ");
        assert_eq!(record.serial().unwrap(), SerialNumber(77));
    }

    #[test]
    fn test_serial_missing_or_invalid() {
        let record = RawRecord::new();
        assert_eq!(
            record.serial().unwrap_err(),
            ClassificationError::MissingField("NSER")
        );

        let record = RawRecord::new().with_text(fields::SERIAL, "abc");
        assert!(matches!(
            record.serial().unwrap_err(),
            ClassificationError::InvalidField { field: "NSER", .. }
        ));
    }

    #[test]
    fn test_collapse_whitespace() {
        let mut record = RawRecord::new().with_text(fields::GOODS, "  09 -  software\n\t and   hardware ");
        record.collapse_whitespace(fields::GOODS);
        assert_eq!(record.text(fields::GOODS), Some("09 - software and hardware"));
    }

    #[test]
    fn test_from_json_map_types_values() {
        let json = serde_json::json!({"NSER": 12, "NTM": "1234500", "DAP": "2001-02-03"});
        let serde_json::Value::Object(map) = json else { panic!("object") };
        let record = RawRecord::from_json_map(map);

        assert_eq!(record.get("NSER"), Some(&FieldValue::Int(12)));
        assert_eq!(record.text("NTM"), Some("1234500"));
        assert!(matches!(record.get("DAP"), Some(FieldValue::Date(_))));
    }

    #[test]
    fn test_has_value() {
        let record = RawRecord::new()
            .with_text("OWN", "  ")
            .with_text("NPP", "Ivanov");
        assert!(!record.has_value("OWN"));
        assert!(record.has_value("NPP"));
        assert!(!record.has_value("MISSING"));
    }
}
