//! Typed field values and the EAV type dispatcher.
//!
//! Source values are typed once, when a record is loaded, into [`FieldValue`].
//! Before an attribute row is written the value passes through a
//! [`TextPolicy`] and is then dispatched to a value kind and a value slot.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::MappingError;

/// A source or derived value, tagged with its shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bool(bool),
    Guid(Uuid),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::Date(d) => write!(f, "{}", d),
            FieldValue::DateTime(dt) => write!(f, "{}", dt),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Guid(g) => write!(f, "{}", g),
        }
    }
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Null, or text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Date and date-time values as a timestamp (dates at midnight).
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::Date(d) => d.and_hms_opt(0, 0, 0),
            FieldValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Type a JSON value from a source export.
    ///
    /// Strings shaped like `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` become dates;
    /// nested arrays and objects are kept as their JSON text.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    FieldValue::Float(f)
                } else {
                    FieldValue::Null
                }
            }
            serde_json::Value::String(s) => parse_temporal(&s).unwrap_or(FieldValue::Text(s)),
            other => FieldValue::Text(other.to_string()),
        }
    }

    /// Type a YAML literal from a mapping table.
    pub fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Null => FieldValue::Null,
            serde_yaml::Value::Bool(b) => FieldValue::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    FieldValue::Float(f)
                } else {
                    FieldValue::Null
                }
            }
            serde_yaml::Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(serde_yaml::to_string(other).unwrap_or_default()),
        }
    }
}

fn temporal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}([ T]\d{2}:\d{2}:\d{2})?$").expect("static regex")
    })
}

fn parse_temporal(s: &str) -> Option<FieldValue> {
    if !temporal_pattern().is_match(s) {
        return None;
    }
    if s.len() == 10 {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(FieldValue::Date);
    }
    let normalized = s.replacen('T', " ", 1);
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(FieldValue::DateTime)
}

/// EAV value-kind code stored in the attribute row's `Kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueKind {
    Text,
    Int,
    Float,
    Date,
    Bool,
    Guid,
}

impl ValueKind {
    pub fn code(self) -> i32 {
        match self {
            ValueKind::Text => 0,
            ValueKind::Int => 1,
            ValueKind::Float => 2,
            ValueKind::Date => 3,
            ValueKind::Bool => 4,
            ValueKind::Guid => 6,
        }
    }
}

/// The attribute column a value is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSlot {
    Text,
    Int,
    Float,
    Date,
    Bool,
    Guid,
}

impl ValueSlot {
    pub fn column(self) -> &'static str {
        match self {
            ValueSlot::Text => "TextValue",
            ValueSlot::Int => "IntValue",
            ValueSlot::Float => "FloatValue",
            ValueSlot::Date => "DateValue",
            ValueSlot::Bool => "BoolValue",
            ValueSlot::Guid => "GuidValue",
        }
    }
}

/// Map a value's shape to its kind and slot.
pub fn dispatch(value: &FieldValue) -> (ValueKind, ValueSlot) {
    match value {
        FieldValue::Null | FieldValue::Text(_) => (ValueKind::Text, ValueSlot::Text),
        FieldValue::Int(_) => (ValueKind::Int, ValueSlot::Int),
        FieldValue::Float(_) => (ValueKind::Float, ValueSlot::Float),
        FieldValue::Date(_) | FieldValue::DateTime(_) => (ValueKind::Date, ValueSlot::Date),
        FieldValue::Bool(_) => (ValueKind::Bool, ValueSlot::Bool),
        FieldValue::Guid(_) => (ValueKind::Guid, ValueSlot::Guid),
    }
}

/// The four value columns of an attribute row. At most one is populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlotValues {
    pub text: Option<String>,
    pub int: Option<i64>,
    pub date: Option<NaiveDateTime>,
    pub guid: Option<Uuid>,
}

impl SlotValues {
    /// Dispatch a (normalized) value into the attribute row columns.
    pub fn from_value(attribute: &str, value: FieldValue) -> Result<(ValueKind, Self), MappingError> {
        let (kind, slot) = dispatch(&value);
        let mut slots = SlotValues::default();
        match value {
            FieldValue::Null => {}
            FieldValue::Text(s) => slots.text = Some(s),
            FieldValue::Int(i) => slots.int = Some(i),
            FieldValue::Date(d) => slots.date = d.and_hms_opt(0, 0, 0),
            FieldValue::DateTime(dt) => slots.date = Some(dt),
            FieldValue::Guid(g) => slots.guid = Some(g),
            FieldValue::Float(_) | FieldValue::Bool(_) => {
                return Err(MappingError::UnstorableSlot {
                    attribute: attribute.to_string(),
                    slot: slot.column(),
                })
            }
        }
        Ok((kind, slots))
    }

    pub fn populated(&self) -> usize {
        usize::from(self.text.is_some())
            + usize::from(self.int.is_some())
            + usize::from(self.date.is_some())
            + usize::from(self.guid.is_some())
    }
}

/// Placeholder tokens the legacy exports use instead of an empty value.
pub const DEFAULT_PLACEHOLDERS: &[&str] = &[
    "TM_DAT__", "NSER", "NAP", "NAPTW", "TWICE", "DAP", "CU", "IS", "WCD",
];

/// Text clean-up applied to every value before dispatch.
#[derive(Debug, Clone)]
pub struct TextPolicy {
    strip_non_ascii: bool,
    placeholders: HashSet<String>,
}

impl Default for TextPolicy {
    fn default() -> Self {
        Self::new(true, DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()))
    }
}

impl TextPolicy {
    pub fn new(strip_non_ascii: bool, placeholders: impl IntoIterator<Item = String>) -> Self {
        Self {
            strip_non_ascii,
            placeholders: placeholders.into_iter().collect(),
        }
    }

    pub fn is_placeholder(&self, text: &str) -> bool {
        self.placeholders.contains(text)
    }

    /// Non-text values pass through untouched.
    pub fn normalize(&self, value: FieldValue) -> FieldValue {
        let FieldValue::Text(text) = value else {
            return value;
        };
        let mut text = if self.strip_non_ascii {
            text.chars().filter(char::is_ascii).collect()
        } else {
            text
        };
        if text.contains('\'') {
            // the sink's statement builder chokes on raw quotes
            text = text.replace('\'', "`");
        }
        if text.is_empty() || self.is_placeholder(&text) {
            FieldValue::Null
        } else {
            FieldValue::Text(text)
        }
    }
}
