use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use uuid::Uuid;

use super::{MigrationSink, PriorAttribute, PriorNode, PriorObject};
use crate::error::SinkError;
use crate::graph::{AttributeRow, NodeRow, StorageObjectRow, TableCounts};

#[derive(Debug, Default)]
struct Tables {
    objects: IndexMap<Uuid, StorageObjectRow>,
    nodes: Vec<NodeRow>,
    attributes: Vec<AttributeRow>,
}

/// In-process sink holding all four row shapes. Used by `plan` runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: RwLock<Tables>,
    fail_deletes: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delete fail with [`SinkError::Unavailable`].
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, SinkError> {
        self.tables
            .read()
            .map_err(|_| SinkError::Unavailable("memory sink lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, SinkError> {
        self.tables
            .write()
            .map_err(|_| SinkError::Unavailable("memory sink lock poisoned".to_string()))
    }

    pub fn objects(&self) -> Vec<StorageObjectRow> {
        self.read()
            .map(|t| t.objects.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> Vec<NodeRow> {
        self.read().map(|t| t.nodes.clone()).unwrap_or_default()
    }

    pub fn attributes(&self) -> Vec<AttributeRow> {
        self.read().map(|t| t.attributes.clone()).unwrap_or_default()
    }

    pub fn counts(&self) -> TableCounts {
        let Ok(tables) = self.read() else {
            return TableCounts::default();
        };
        let parented = tables.nodes.iter().filter(|n| n.parent_attr_id.is_some()).count();
        TableCounts {
            objects: tables.objects.len(),
            parentless_nodes: tables.nodes.len() - parented,
            parented_nodes: parented,
            attributes: tables.attributes.len(),
        }
    }
}

impl MigrationSink for MemorySink {
    fn prior_attributes(
        &self,
        creator_prefix: &str,
        names: &[String],
    ) -> Result<Vec<PriorAttribute>, SinkError> {
        let tables = self.read()?;
        Ok(tables
            .attributes
            .iter()
            .filter(|a| a.created_by.starts_with(creator_prefix) && names.contains(&a.name))
            .map(|a| PriorAttribute {
                id: a.id,
                object_id: a.parent_number,
                node_id: a.parent_attr_id,
                name: a.name.clone(),
                text_value: a.text_value.clone(),
                int_value: a.int_value,
            })
            .collect())
    }

    fn prior_nodes(&self, names: &[String]) -> Result<Vec<PriorNode>, SinkError> {
        let tables = self.read()?;
        Ok(tables
            .nodes
            .iter()
            .filter(|n| names.contains(&n.name))
            .map(|n| PriorNode {
                id: n.id,
                object_id: n.parent_number,
                name: n.name.clone(),
            })
            .collect())
    }

    fn prior_objects(&self, class_types: RangeInclusive<i32>) -> Result<Vec<PriorObject>, SinkError> {
        let tables = self.read()?;
        Ok(tables
            .objects
            .values()
            .filter(|o| {
                o.class_type
                    .parse::<i32>()
                    .map_or(false, |c| class_types.contains(&c))
            })
            .map(|o| PriorObject {
                number: o.number,
                parent_number: o.parent_number.clone(),
                class_type: o.class_type.clone(),
            })
            .collect())
    }

    fn delete_object(&self, object_id: Uuid) -> Result<usize, SinkError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable(format!(
                "delete of {} rejected",
                object_id
            )));
        }
        let mut tables = self.write()?;
        let mut removed = usize::from(tables.objects.shift_remove(&object_id).is_some());

        let before = tables.nodes.len();
        tables.nodes.retain(|n| n.parent_number != object_id);
        removed += before - tables.nodes.len();

        let before = tables.attributes.len();
        tables.attributes.retain(|a| a.parent_number != object_id);
        removed += before - tables.attributes.len();

        Ok(removed)
    }

    fn insert_objects(&self, rows: &[StorageObjectRow]) -> Result<usize, SinkError> {
        let mut tables = self.write()?;
        for row in rows {
            if tables.objects.contains_key(&row.number) {
                return Err(SinkError::Unavailable(format!(
                    "duplicate object number {}",
                    row.number
                )));
            }
            tables.objects.insert(row.number, row.clone());
        }
        Ok(rows.len())
    }

    fn insert_parentless_nodes(&self, rows: &[NodeRow]) -> Result<usize, SinkError> {
        self.write()?.nodes.extend_from_slice(rows);
        Ok(rows.len())
    }

    fn insert_parented_nodes(&self, rows: &[NodeRow]) -> Result<usize, SinkError> {
        self.write()?.nodes.extend_from_slice(rows);
        Ok(rows.len())
    }

    fn insert_attributes(&self, rows: &[AttributeRow]) -> Result<usize, SinkError> {
        self.write()?.attributes.extend_from_slice(rows);
        Ok(rows.len())
    }
}
