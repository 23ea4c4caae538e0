//! Rewrite reconciliation against previously migrated data.
//!
//! A serial number that was migrated before is retired at the sink (attachment
//! object first, then the root object) and recreated under the same
//! identifiers, so re-running a migration never duplicates a record.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::classify::Variant;
use crate::error::{ReconciliationError, SinkError};
use crate::record::SerialNumber;
use crate::sink::{MigrationSink, PriorAttribute, PriorNode, PriorObject};

pub const RETRO_NUMBER: &str = "retro_number";
pub const REG_NUMBER: &str = "reg_number";

/// What the prior-state snapshot is loaded with.
#[derive(Debug, Clone)]
pub struct PriorQuery {
    pub creator_prefix: String,
    pub attribute_names: Vec<String>,
    pub class_types: RangeInclusive<i32>,
}

impl Default for PriorQuery {
    fn default() -> Self {
        Self {
            creator_prefix: "EA_Migration_".to_string(),
            attribute_names: vec![
                RETRO_NUMBER.to_string(),
                "appl_number".to_string(),
                REG_NUMBER.to_string(),
            ],
            class_types: 100..=800,
        }
    }
}

/// Identifiers to reuse when recreating a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewritePlan {
    pub rewrite: bool,
    pub root_id: Option<Uuid>,
    pub node_id: Option<Uuid>,
    pub attachment_id: Option<Uuid>,
}

impl RewritePlan {
    pub fn fresh() -> Self {
        Self::default()
    }
}

/// Snapshot of prior migration state, loaded once per run.
#[derive(Debug, Default)]
pub struct PriorIndex {
    by_retro_number: HashMap<String, PriorAttribute>,
    reg_numbers: Vec<PriorAttribute>,
    appellation_nodes: HashMap<Uuid, PriorNode>,
    children: HashMap<String, Uuid>,
}

impl PriorIndex {
    pub fn load(sink: &dyn MigrationSink, query: &PriorQuery) -> Result<Self, SinkError> {
        let attributes = sink.prior_attributes(&query.creator_prefix, &query.attribute_names)?;
        let nodes = sink.prior_nodes(&[Variant::RuAppellation.main_table().to_string()])?;
        let objects = sink.prior_objects(query.class_types.clone())?;
        tracing::info!(
            "Loaded prior state: {} attributes, {} appellation nodes, {} objects",
            attributes.len(),
            nodes.len(),
            objects.len()
        );
        Ok(Self::from_parts(attributes, nodes, objects))
    }

    pub fn from_parts(
        attributes: Vec<PriorAttribute>,
        nodes: Vec<PriorNode>,
        objects: Vec<PriorObject>,
    ) -> Self {
        let mut index = PriorIndex::default();
        for attr in attributes {
            match attr.name.as_str() {
                RETRO_NUMBER => {
                    if let Some(value) = attr.value_text() {
                        index.by_retro_number.entry(value).or_insert(attr);
                    }
                }
                REG_NUMBER => index.reg_numbers.push(attr),
                _ => {}
            }
        }
        index.appellation_nodes = nodes.into_iter().map(|n| (n.id, n)).collect();
        index.children = objects
            .into_iter()
            .map(|o| (o.parent_number, o.number))
            .collect();
        index
    }

    /// The `retro_number` attribute recorded for `serial`, if any.
    pub fn retro_match(&self, serial: SerialNumber) -> Option<&PriorAttribute> {
        self.by_retro_number.get(&serial.to_string())
    }

    /// Attachment object whose parent is `root`.
    pub fn attachment_of(&self, root: Uuid) -> Option<Uuid> {
        self.children.get(&root.to_string()).copied()
    }

    /// Node the record's `retro_number` lives on, unless it belongs to another
    /// object. A linked certificate writes onto its primary's node, which must
    /// not be reused as the certificate's own node.
    pub fn owned_node(&self, prior: &PriorAttribute) -> Option<Uuid> {
        match self.appellation_nodes.get(&prior.node_id) {
            Some(node) if node.object_id != prior.object_id => None,
            _ => Some(prior.node_id),
        }
    }

    /// Main node of a previously migrated primary appellation.
    pub fn primary_appellation(&self, reg_number: &str) -> Option<Uuid> {
        self.reg_numbers
            .iter()
            .filter(|a| a.text_value.as_deref() == Some(reg_number))
            .find(|a| self.appellation_nodes.contains_key(&a.node_id))
            .map(|a| a.node_id)
    }
}

pub struct Reconciler {
    index: PriorIndex,
    sink: Arc<dyn MigrationSink>,
    current_appellations: RwLock<HashMap<String, Uuid>>,
}

impl Reconciler {
    pub fn new(index: PriorIndex, sink: Arc<dyn MigrationSink>) -> Self {
        Self {
            index,
            sink,
            current_appellations: RwLock::new(HashMap::new()),
        }
    }

    /// Retire the prior subtree of `serial`, if there is one.
    ///
    /// On error the prior rows may be partially deleted; callers migrate the
    /// record as new.
    pub fn reconcile(&self, serial: SerialNumber) -> Result<RewritePlan, ReconciliationError> {
        let Some(prior) = self.index.retro_match(serial) else {
            return Ok(RewritePlan::fresh());
        };
        let root_id = prior.object_id;
        let attachment_id = self.index.attachment_of(root_id);

        if let Some(attachment) = attachment_id {
            self.delete(attachment)?;
        }
        self.delete(root_id)?;
        tracing::info!("Serial {} was migrated before, rewriting object {}", serial, root_id);

        Ok(RewritePlan {
            rewrite: true,
            root_id: Some(root_id),
            node_id: self.index.owned_node(prior),
            attachment_id,
        })
    }

    fn delete(&self, object_id: Uuid) -> Result<usize, ReconciliationError> {
        self.sink
            .delete_object(object_id)
            .map_err(|source| ReconciliationError::Delete { object_id, source })
    }

    /// Make a primary appellation built in this run visible to certificates.
    pub fn register_appellation(&self, reg_number: &str, node_id: Uuid) {
        if let Ok(mut current) = self.current_appellations.write() {
            current.insert(reg_number.to_string(), node_id);
        }
    }

    /// Main node of the primary appellation registered as `reg_number`,
    /// looking at this run first.
    pub fn find_primary_appellation(&self, reg_number: &str) -> Option<Uuid> {
        let current = self
            .current_appellations
            .read()
            .ok()
            .and_then(|m| m.get(reg_number).copied());
        current.or_else(|| self.index.primary_appellation(reg_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn attr(name: &str, object: Uuid, node: Uuid, text: Option<&str>, int: Option<i64>) -> PriorAttribute {
        PriorAttribute {
            id: Uuid::new_v4(),
            object_id: object,
            node_id: node,
            name: name.into(),
            text_value: text.map(String::from),
            int_value: int,
        }
    }

    #[test]
    fn test_fresh_when_no_prior() {
        let reconciler = Reconciler::new(PriorIndex::default(), Arc::new(MemorySink::new()));
        assert_eq!(reconciler.reconcile(SerialNumber(1)).unwrap(), RewritePlan::fresh());
    }

    #[test]
    fn test_rewrite_recovers_ids() {
        let root = Uuid::new_v4();
        let node = Uuid::new_v4();
        let attachment = Uuid::new_v4();
        let index = PriorIndex::from_parts(
            vec![attr(RETRO_NUMBER, root, node, None, Some(42))],
            Vec::new(),
            vec![PriorObject {
                number: attachment,
                parent_number: root.to_string(),
                class_type: "101".into(),
            }],
        );
        let reconciler = Reconciler::new(index, Arc::new(MemorySink::new()));

        let plan = reconciler.reconcile(SerialNumber(42)).unwrap();
        assert!(plan.rewrite);
        assert_eq!(plan.root_id, Some(root));
        assert_eq!(plan.node_id, Some(node));
        assert_eq!(plan.attachment_id, Some(attachment));
    }

    #[test]
    fn test_linked_certificate_does_not_reuse_primary_node() {
        let primary_root = Uuid::new_v4();
        let primary_node = Uuid::new_v4();
        let certificate_root = Uuid::new_v4();
        let index = PriorIndex::from_parts(
            vec![
                attr(RETRO_NUMBER, primary_root, primary_node, None, Some(2)),
                attr(RETRO_NUMBER, certificate_root, primary_node, None, Some(3)),
            ],
            vec![PriorNode {
                id: primary_node,
                object_id: primary_root,
                name: "RUAppellation".into(),
            }],
            Vec::new(),
        );
        let reconciler = Reconciler::new(index, Arc::new(MemorySink::new()));

        let certificate = reconciler.reconcile(SerialNumber(3)).unwrap();
        assert!(certificate.rewrite);
        assert_eq!(certificate.root_id, Some(certificate_root));
        assert_eq!(certificate.node_id, None);

        let primary = reconciler.reconcile(SerialNumber(2)).unwrap();
        assert_eq!(primary.node_id, Some(primary_node));
    }

    #[test]
    fn test_delete_failure_is_reported() {
        let root = Uuid::new_v4();
        let index = PriorIndex::from_parts(
            vec![attr(RETRO_NUMBER, root, Uuid::new_v4(), Some("7"), None)],
            Vec::new(),
            Vec::new(),
        );
        let sink = Arc::new(MemorySink::new());
        sink.set_fail_deletes(true);
        let reconciler = Reconciler::new(index, sink);

        let err = reconciler.reconcile(SerialNumber(7)).unwrap_err();
        let ReconciliationError::Delete { object_id, .. } = err;
        assert_eq!(object_id, root);
    }

    #[test]
    fn test_primary_appellation_lookup() {
        let object = Uuid::new_v4();
        let node = Uuid::new_v4();
        let stray = Uuid::new_v4();
        let index = PriorIndex::from_parts(
            vec![
                attr(REG_NUMBER, object, stray, Some("12300"), None),
                attr(REG_NUMBER, object, node, Some("12300"), None),
            ],
            vec![PriorNode {
                id: node,
                object_id: object,
                name: "RUAppellation".into(),
            }],
            Vec::new(),
        );
        let reconciler = Reconciler::new(index, Arc::new(MemorySink::new()));
        assert_eq!(reconciler.find_primary_appellation("12300"), Some(node));
        assert_eq!(reconciler.find_primary_appellation("45600"), None);

        let current = Uuid::new_v4();
        reconciler.register_appellation("45600", current);
        assert_eq!(reconciler.find_primary_appellation("45600"), Some(current));
    }
}
