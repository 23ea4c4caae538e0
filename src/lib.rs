//! # registry-eav: legacy registry to EAV graph migration
//!
//! Moves trademark and appellation-of-origin records out of flat legacy
//! registry exports and into a generic entity-attribute-value store made of
//! storage objects, attribute nodes and typed attributes.
//!
//! ## Pipeline
//!
//! - **source**: NDJSON exports plus an image directory, merged per serial number
//! - **classify**: each record is one of five structural variants
//! - **reconcile**: a serial migrated before is retired and recreated under its
//!   old identifiers
//! - **graph**: YAML mapping tables drive the construction of each record's
//!   object/node/attribute subtree
//! - **sink**: the merged row buffers are bulk-loaded (PostgreSQL via Diesel,
//!   or in memory)
//!
//! ## Example: mapping table
//!
//! ```yaml
//! tables:
//!   RUTmkGoodsServices:
//!     goods_text: GOODS             # source field
//!     goods_class: null             # absent, no value
//!     update_time: { derived: now }
//!     status: { literal: 1 }
//! ```

pub mod attachment;
pub mod classify;
pub mod config;
pub mod dump;
pub mod error;
pub mod graph;
pub mod logging;
pub mod mapping;
pub mod pipeline;
pub mod reconcile;
pub mod record;
pub mod report;
pub mod sink;
pub mod source;
pub mod value;

// Re-export key types
pub use attachment::{
    ArchiveIngestor, ImageFormat, ImageIngestor, ImagePass, ImageRequest, IngestedImage,
};
pub use classify::{classify, Classification, Variant, VariantCounters};
pub use config::MigrationConfig;
pub use error::{
    ClassificationError, ImageIngestionError, MappingError, MigrationError, ReconciliationError,
    RecordError, SinkError,
};
pub use graph::{
    AttributeRow, BuildSettings, GraphBuilder, NodeRow, RecordGraph, RowBuffers, StorageObjectRow,
    TableCounts,
};
pub use mapping::{AttributeSource, AttributeTable, ContactRole, DerivedValue, MappingSet};
pub use pipeline::{MigrationPlan, Migrator, PipelineSettings};
pub use reconcile::{PriorIndex, PriorQuery, Reconciler, RewritePlan};
pub use record::{RawRecord, SerialNumber};
pub use report::RunReport;
pub use sink::{DatabaseConfig, MemorySink, MigrationSink};
pub use source::SourceReader;
pub use value::{FieldValue, TextPolicy, ValueKind};

#[cfg(feature = "postgres")]
pub use sink::{Database, DatabaseSink};
