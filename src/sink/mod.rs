//! Relational sink the migration reads prior state from and bulk-loads into.

pub mod database;
pub mod memory;
pub mod models;
pub mod schema;

use std::ops::RangeInclusive;

use uuid::Uuid;

use crate::error::SinkError;
use crate::graph::{AttributeRow, NodeRow, StorageObjectRow};

pub use memory::MemorySink;

pub use database::DatabaseConfig;
#[cfg(feature = "postgres")]
pub use database::{Database, DatabaseSink};

/// A previously migrated attribute row, as far as reconciliation cares.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorAttribute {
    pub id: Uuid,
    pub object_id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    pub text_value: Option<String>,
    pub int_value: Option<i64>,
}

impl PriorAttribute {
    /// Text form of whichever value slot is populated.
    pub fn value_text(&self) -> Option<String> {
        self.text_value
            .clone()
            .or_else(|| self.int_value.map(|i| i.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorNode {
    pub id: Uuid,
    pub object_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorObject {
    pub number: Uuid,
    /// A parent object id, or the root sentinel.
    pub parent_number: String,
    pub class_type: String,
}

pub trait MigrationSink: Send + Sync {
    /// Attribute rows whose creator tag starts with `creator_prefix` and whose
    /// name is one of `names`.
    fn prior_attributes(
        &self,
        creator_prefix: &str,
        names: &[String],
    ) -> Result<Vec<PriorAttribute>, SinkError>;

    /// Attribute-node rows named one of `names`.
    fn prior_nodes(&self, names: &[String]) -> Result<Vec<PriorNode>, SinkError>;

    /// Storage objects whose class type lies in `class_types`.
    fn prior_objects(&self, class_types: RangeInclusive<i32>) -> Result<Vec<PriorObject>, SinkError>;

    /// Delete one storage object and every node and attribute row it owns.
    /// Returns the number of rows removed.
    fn delete_object(&self, object_id: Uuid) -> Result<usize, SinkError>;

    fn insert_objects(&self, rows: &[StorageObjectRow]) -> Result<usize, SinkError>;

    fn insert_parentless_nodes(&self, rows: &[NodeRow]) -> Result<usize, SinkError>;

    fn insert_parented_nodes(&self, rows: &[NodeRow]) -> Result<usize, SinkError>;

    fn insert_attributes(&self, rows: &[AttributeRow]) -> Result<usize, SinkError>;
}
