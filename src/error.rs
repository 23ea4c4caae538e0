//! Error types for every stage of a migration run.
//!
//! Per-record errors ([`RecordError`]) are collected into the run report and
//! never abort the run. [`MigrationError`] is reserved for failures that stop
//! the whole run (prior-state loading, bulk load, configuration).

use std::fmt;

use uuid::Uuid;

/// Malformed discriminator or key fields. Fails the record.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationError {
    MissingField(&'static str),
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

impl fmt::Display for ClassificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationError::MissingField(field) => {
                write!(f, "Required field '{}' is missing or empty", field)
            }
            ClassificationError::InvalidField { field, reason } => {
                write!(f, "Invalid field '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ClassificationError {}

/// Failure while retiring previously migrated rows. The record then
/// proceeds as a fresh migration.
#[derive(Debug)]
pub enum ReconciliationError {
    Delete { object_id: Uuid, source: SinkError },
}

impl fmt::Display for ReconciliationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationError::Delete { object_id, source } => {
                write!(f, "Failed to delete prior object {}: {}", object_id, source)
            }
        }
    }
}

impl std::error::Error for ReconciliationError {}

/// Failure while expanding one node's attribute table.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingError {
    /// A mapping document could not be read, parsed or validated.
    Load(String),
    UnknownTable(String),
    MissingDerived {
        attribute: String,
        derived: &'static str,
    },
    UnstorableSlot {
        attribute: String,
        slot: &'static str,
    },
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingError::Load(msg) => write!(f, "{}", msg),
            MappingError::UnknownTable(table) => write!(f, "No mapping table named '{}'", table),
            MappingError::MissingDerived { attribute, derived } => write!(
                f,
                "Attribute '{}' derives from '{}' which is not available for this node",
                attribute, derived
            ),
            MappingError::UnstorableSlot { attribute, slot } => write!(
                f,
                "Attribute '{}' dispatches to {} which has no column in the attribute table",
                attribute, slot
            ),
        }
    }
}

impl std::error::Error for MappingError {}

/// Unreadable or undecodable image. The attachment is skipped.
#[derive(Debug)]
pub enum ImageIngestionError {
    Io(std::io::Error),
    Decode(image::ImageError),
}

impl fmt::Display for ImageIngestionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageIngestionError::Io(e) => write!(f, "Image IO error: {}", e),
            ImageIngestionError::Decode(e) => write!(f, "Image decode error: {}", e),
        }
    }
}

impl std::error::Error for ImageIngestionError {}

impl From<std::io::Error> for ImageIngestionError {
    fn from(e: std::io::Error) -> Self {
        ImageIngestionError::Io(e)
    }
}

impl From<image::ImageError> for ImageIngestionError {
    fn from(e: image::ImageError) -> Self {
        ImageIngestionError::Decode(e)
    }
}

/// Errors raised by a [`crate::sink::MigrationSink`].
#[derive(Debug)]
pub enum SinkError {
    Database(diesel::result::Error),
    Pool(String),
    Unavailable(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Database(e) => write!(f, "Database error: {}", e),
            SinkError::Pool(msg) => write!(f, "Database pool error: {}", msg),
            SinkError::Unavailable(msg) => write!(f, "Sink unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<diesel::result::Error> for SinkError {
    fn from(e: diesel::result::Error) -> Self {
        SinkError::Database(e)
    }
}

impl From<r2d2::Error> for SinkError {
    fn from(e: r2d2::Error) -> Self {
        SinkError::Pool(e.to_string())
    }
}

/// Why a single record was abandoned.
#[derive(Debug)]
pub enum RecordError {
    Classification(ClassificationError),
    /// A mapping table the record needs is missing. Attribute-level mapping
    /// errors never get here; they only cut one node short.
    Mapping(MappingError),
    /// The worker building the record panicked.
    Worker(String),
}

impl RecordError {
    /// Short machine-friendly label used in the run report.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Classification(_) => "classification",
            RecordError::Mapping(_) => "mapping",
            RecordError::Worker(_) => "worker",
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Classification(e) => write!(f, "{}", e),
            RecordError::Mapping(e) => write!(f, "{}", e),
            RecordError::Worker(msg) => write!(f, "Worker panicked: {}", msg),
        }
    }
}

impl std::error::Error for RecordError {}

impl From<ClassificationError> for RecordError {
    fn from(e: ClassificationError) -> Self {
        RecordError::Classification(e)
    }
}

impl From<MappingError> for RecordError {
    fn from(e: MappingError) -> Self {
        RecordError::Mapping(e)
    }
}

/// Errors that stop a whole run.
#[derive(Debug)]
pub enum MigrationError {
    Config(String),
    Source(String),
    Mapping(MappingError),
    Sink(SinkError),
    Worker(String),
    Io(std::io::Error),
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MigrationError::Source(msg) => write!(f, "Source error: {}", msg),
            MigrationError::Mapping(e) => write!(f, "Mapping table error: {}", e),
            MigrationError::Sink(e) => write!(f, "{}", e),
            MigrationError::Worker(msg) => write!(f, "Worker failure: {}", msg),
            MigrationError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for MigrationError {}

impl From<SinkError> for MigrationError {
    fn from(e: SinkError) -> Self {
        MigrationError::Sink(e)
    }
}

impl From<MappingError> for MigrationError {
    fn from(e: MappingError) -> Self {
        MigrationError::Mapping(e)
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(e: std::io::Error) -> Self {
        MigrationError::Io(e)
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(e: serde_json::Error) -> Self {
        MigrationError::Source(e.to_string())
    }
}
