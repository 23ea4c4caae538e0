//! Output row shapes and per-record row buffers.

pub mod builder;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use uuid::Uuid;

use crate::classify::Variant;
use crate::record::SerialNumber;

pub use builder::{BuildSettings, GraphBuilder};

/// Parent number of a root storage object.
pub const ROOT_SENTINEL: &str = "-ROOT-";
pub const STRUCTURE_ID: &str = "100";
pub const OBJECT_STATE: &str = "0";
pub const OBJECT_VERSION: &str = "1";
/// `Kind` of every attribute-node row.
pub const NODE_KIND: i32 = 5;

/// `0001-01-01 00:00:00`, written to the storage-period columns.
pub fn unknown_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .unwrap_or_default()
        .and_time(NaiveTime::default())
}

/// One `"Objects"` row (13 columns).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageObjectRow {
    pub number: Uuid,
    pub kind: i32,
    pub parent_number: String,
    pub structure_id: String,
    pub update_date: NaiveDateTime,
    pub created_date: NaiveDateTime,
    pub state: String,
    pub oper_storage_period: NaiveDateTime,
    pub temp_storage_period: NaiveDateTime,
    pub class_type: String,
    pub last_storage_period: NaiveDateTime,
    pub version: String,
    pub received: Option<NaiveDateTime>,
}

impl StorageObjectRow {
    pub fn new(
        number: Uuid,
        kind: i32,
        parent: Option<Uuid>,
        class_type: &str,
        received: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> Self {
        let unknown = unknown_date();
        Self {
            number,
            kind,
            parent_number: parent.map_or_else(|| ROOT_SENTINEL.to_string(), |p| p.to_string()),
            structure_id: STRUCTURE_ID.to_string(),
            update_date: now,
            created_date: now,
            state: OBJECT_STATE.to_string(),
            oper_storage_period: unknown,
            temp_storage_period: unknown,
            class_type: class_type.to_string(),
            last_storage_period: unknown,
            version: OBJECT_VERSION.to_string(),
            received,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_number == ROOT_SENTINEL
    }
}

/// One attribute-node row in `"SearchAttributes"`.
///
/// Parentless nodes are written with 7 columns, parented ones with 8
/// (`ParentAttrId` added).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRow {
    pub id: Uuid,
    pub name: String,
    pub parent_number: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_attr_id: Option<Uuid>,
    pub kind: i32,
    pub created_by: String,
    pub created_date: NaiveDateTime,
    pub guid_value: Uuid,
}

/// One typed attribute row in `"SearchAttributes"` (11 columns).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeRow {
    pub id: Uuid,
    pub created_date: NaiveDateTime,
    pub parent_number: Uuid,
    pub parent_attr_id: Uuid,
    pub name: String,
    pub kind: i32,
    pub text_value: Option<String>,
    pub int_value: Option<i64>,
    pub date_value: Option<NaiveDateTime>,
    pub guid_value: Option<Uuid>,
    pub created_by: String,
}

/// Row counts per target table shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub objects: usize,
    pub parentless_nodes: usize,
    pub parented_nodes: usize,
    pub attributes: usize,
}

/// The four row buffers, in bulk-load order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RowBuffers {
    pub objects: Vec<StorageObjectRow>,
    pub parentless_nodes: Vec<NodeRow>,
    pub parented_nodes: Vec<NodeRow>,
    pub attributes: Vec<AttributeRow>,
}

impl RowBuffers {
    pub fn push_node(&mut self, node: NodeRow) {
        if node.parent_attr_id.is_some() {
            self.parented_nodes.push(node);
        } else {
            self.parentless_nodes.push(node);
        }
    }

    pub fn append(&mut self, other: RowBuffers) {
        self.objects.extend(other.objects);
        self.parentless_nodes.extend(other.parentless_nodes);
        self.parented_nodes.extend(other.parented_nodes);
        self.attributes.extend(other.attributes);
    }

    pub fn counts(&self) -> TableCounts {
        TableCounts {
            objects: self.objects.len(),
            parentless_nodes: self.parentless_nodes.len(),
            parented_nodes: self.parented_nodes.len(),
            attributes: self.attributes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts() == TableCounts::default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRow> {
        self.parentless_nodes.iter().chain(self.parented_nodes.iter())
    }

    pub fn nodes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a NodeRow> + 'a {
        self.nodes().filter(move |n| n.name == name)
    }

    pub fn attributes_of(&self, node_id: Uuid) -> impl Iterator<Item = &AttributeRow> + '_ {
        self.attributes.iter().filter(move |a| a.parent_attr_id == node_id)
    }
}

/// Everything one record produced. Merged by the coordinator only when the
/// whole record succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct RecordGraph {
    pub serial: SerialNumber,
    pub variant: Variant,
    pub root_object_id: Uuid,
    pub main_node_id: Uuid,
    /// The main node belongs to a primary appellation, not to this record.
    pub linked: bool,
    pub rows: RowBuffers,
    pub warnings: Vec<String>,
}

impl RecordGraph {
    pub fn new(serial: SerialNumber, variant: Variant, root_object_id: Uuid) -> Self {
        Self {
            serial,
            variant,
            root_object_id,
            main_node_id: Uuid::nil(),
            linked: false,
            rows: RowBuffers::default(),
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap()
    }

    fn node(parent: Option<Uuid>) -> NodeRow {
        let id = Uuid::new_v4();
        NodeRow {
            id,
            name: "RUTrademark".into(),
            parent_number: Uuid::new_v4(),
            parent_attr_id: parent,
            kind: NODE_KIND,
            created_by: "EA_Migration_101".into(),
            created_date: now(),
            guid_value: id,
        }
    }

    #[test]
    fn test_root_object_defaults() {
        let row = StorageObjectRow::new(Uuid::new_v4(), 100001, None, "101", None, now());
        assert!(row.is_root());
        assert_eq!(row.parent_number, "-ROOT-");
        assert_eq!(row.structure_id, "100");
        assert_eq!(row.state, "0");
        assert_eq!(row.version, "1");
        assert_eq!(row.oper_storage_period.to_string(), "0001-01-01 00:00:00");

        let root = row.number;
        let child = StorageObjectRow::new(Uuid::new_v4(), 100001, Some(root), "101", None, now());
        assert_eq!(child.parent_number, root.to_string());
        assert!(!child.is_root());
    }

    #[test]
    fn test_push_node_routes_by_parent() {
        let mut rows = RowBuffers::default();
        rows.push_node(node(None));
        rows.push_node(node(Some(Uuid::new_v4())));
        rows.push_node(node(Some(Uuid::new_v4())));
        let counts = rows.counts();
        assert_eq!(counts.parentless_nodes, 1);
        assert_eq!(counts.parented_nodes, 2);
        assert_eq!(rows.nodes_named("RUTrademark").count(), 3);
    }

    #[test]
    fn test_append_merges_all_buffers() {
        let mut a = RowBuffers::default();
        a.push_node(node(None));
        let mut b = RowBuffers::default();
        b.objects
            .push(StorageObjectRow::new(Uuid::new_v4(), 1, None, "101", None, now()));
        b.push_node(node(Some(Uuid::new_v4())));
        a.append(b);
        assert_eq!(
            a.counts(),
            TableCounts {
                objects: 1,
                parentless_nodes: 1,
                parented_nodes: 1,
                attributes: 0
            }
        );
    }

    #[test]
    fn test_parentless_node_serializes_seven_columns() {
        let json = serde_json::to_value(node(None)).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 7);
        let json = serde_json::to_value(node(Some(Uuid::new_v4()))).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 8);
    }
}
