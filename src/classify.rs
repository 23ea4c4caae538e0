//! Structural variant classification.
//!
//! Decision order (first match wins):
//! 1. `NTM` carries the `999` prefix: foreign trademark, prefix stripped
//! 2. `IS == "I"`: international (Madrid) trademark
//! 3. `WCD == "N"`: appellation of origin; `NTM` ending in `00` is the primary
//!    appellation, any other suffix a certificate
//! 4. otherwise: domestic trademark

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::ClassificationError;
use crate::record::{fields, RawRecord, SerialNumber};
use crate::value::FieldValue;

pub const FOREIGN_PREFIX: &str = "999";
pub const PRIMARY_APPELLATION_SUFFIX: &str = "00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    RuTrademark,
    WkTrademark,
    MadridTrademark,
    RuAppellation,
    RuAppellationCertificate,
}

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::RuTrademark,
        Variant::WkTrademark,
        Variant::MadridTrademark,
        Variant::RuAppellation,
        Variant::RuAppellationCertificate,
    ];

    /// Entity-kind code stamped on the variant's storage objects.
    pub fn kind_code(self) -> i32 {
        match self {
            Variant::RuTrademark | Variant::MadridTrademark => 100001,
            Variant::WkTrademark => 100010,
            Variant::RuAppellation | Variant::RuAppellationCertificate => 100002,
        }
    }

    /// Prefix of the variant's sub-entity tables (`RUTmkPriority`, ...).
    pub fn table_prefix(self) -> &'static str {
        match self {
            Variant::RuTrademark => "RUTmk",
            Variant::WkTrademark => "WKTmk",
            Variant::MadridTrademark => "MadridTmk",
            Variant::RuAppellation => "RUApl",
            Variant::RuAppellationCertificate => "RUAplCert",
        }
    }

    pub fn main_table(self) -> &'static str {
        match self {
            Variant::RuTrademark => "RUTrademark",
            Variant::WkTrademark => "WKTrademark",
            Variant::MadridTrademark => "MadridTrademark",
            Variant::RuAppellation => "RUAppellation",
            Variant::RuAppellationCertificate => "RUAppellationCertificate",
        }
    }

    /// Only trademark variants carry image attachments.
    pub fn representation_table(self) -> Option<&'static str> {
        match self {
            Variant::RuTrademark => Some("RUTrademarkRepresentationFile"),
            Variant::WkTrademark => Some("WKTrademarkRepresentationFile"),
            Variant::MadridTrademark => Some("MadridTrademarkRepresentationFile"),
            Variant::RuAppellation | Variant::RuAppellationCertificate => None,
        }
    }

    pub fn is_trademark(self) -> bool {
        matches!(
            self,
            Variant::RuTrademark | Variant::WkTrademark | Variant::MadridTrademark
        )
    }

    pub fn is_appellation(self) -> bool {
        !self.is_trademark()
    }

    pub fn has_disclaimer(self) -> bool {
        self.is_trademark() || self == Variant::RuAppellation
    }

    /// Prefixed sub-entity table name, e.g. `sub_table("Priority")`.
    pub fn sub_table(self, suffix: &str) -> String {
        format!("{}{}", self.table_prefix(), suffix)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::RuTrademark => "ru_trademark",
            Variant::WkTrademark => "wk_trademark",
            Variant::MadridTrademark => "madrid_trademark",
            Variant::RuAppellation => "ru_appellation",
            Variant::RuAppellationCertificate => "ru_appellation_certificate",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub serial: SerialNumber,
    pub variant: Variant,
    /// Registration number after prefix stripping.
    pub reg_number: String,
}

impl Classification {
    pub fn kind_code(&self) -> i32 {
        self.variant.kind_code()
    }

    /// Registration number of the primary appellation a certificate belongs to.
    pub fn primary_appellation_number(&self) -> Option<String> {
        if self.variant != Variant::RuAppellationCertificate {
            return None;
        }
        let cut = self.reg_number.len().checked_sub(2)?;
        let root = self.reg_number.get(..cut)?;
        Some(format!("{}{}", root, PRIMARY_APPELLATION_SUFFIX))
    }
}

/// Classify a record, normalizing `NTM` in place.
pub fn classify(record: &mut RawRecord) -> Result<Classification, ClassificationError> {
    let serial = record.serial()?;
    let mut reg_number = registration_number(record)?;

    let variant = if let Some(stripped) = reg_number.strip_prefix(FOREIGN_PREFIX) {
        reg_number = stripped.to_string();
        Variant::WkTrademark
    } else if record.text(fields::INTERNATIONAL).map(str::trim) == Some("I") {
        Variant::MadridTrademark
    } else if record.text(fields::APPELLATION).map(str::trim) == Some("N") {
        if reg_number.len() < 2 || !reg_number.is_char_boundary(reg_number.len() - 2) {
            return Err(ClassificationError::InvalidField {
                field: fields::REG_NUMBER,
                reason: format!("'{}' is too short for an appellation number", reg_number),
            });
        }
        if reg_number.ends_with(PRIMARY_APPELLATION_SUFFIX) {
            Variant::RuAppellation
        } else {
            tracing::warn!("Appellation certificate record {} (NTM {})", serial, reg_number);
            Variant::RuAppellationCertificate
        }
    } else {
        Variant::RuTrademark
    };

    record.insert(fields::REG_NUMBER, FieldValue::Text(reg_number.clone()));

    Ok(Classification {
        serial,
        variant,
        reg_number,
    })
}

fn registration_number(record: &RawRecord) -> Result<String, ClassificationError> {
    match record.get(fields::REG_NUMBER) {
        None | Some(FieldValue::Null) => Err(ClassificationError::MissingField(fields::REG_NUMBER)),
        Some(FieldValue::Text(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(FieldValue::Int(i)) => Ok(i.to_string()),
        Some(FieldValue::Text(_)) => Err(ClassificationError::MissingField(fields::REG_NUMBER)),
        Some(other) => Err(ClassificationError::InvalidField {
            field: fields::REG_NUMBER,
            reason: format!("expected text, got '{}'", other),
        }),
    }
}

/// Per-variant tallies, shared by all workers.
#[derive(Debug, Default)]
pub struct VariantCounters {
    ru_trademark: AtomicU64,
    wk_trademark: AtomicU64,
    madrid_trademark: AtomicU64,
    ru_appellation: AtomicU64,
    ru_appellation_certificate: AtomicU64,
}

impl VariantCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, variant: Variant) -> &AtomicU64 {
        match variant {
            Variant::RuTrademark => &self.ru_trademark,
            Variant::WkTrademark => &self.wk_trademark,
            Variant::MadridTrademark => &self.madrid_trademark,
            Variant::RuAppellation => &self.ru_appellation,
            Variant::RuAppellationCertificate => &self.ru_appellation_certificate,
        }
    }

    pub fn record(&self, variant: Variant) {
        self.counter(variant).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, variant: Variant) -> u64 {
        self.counter(variant).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> IndexMap<Variant, u64> {
        Variant::ALL.iter().map(|v| (*v, self.get(*v))).collect()
    }
}
