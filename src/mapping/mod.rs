//! Per-variant attribute mapping tables.
//!
//! Every node the graph builder creates is populated from one
//! [`AttributeTable`]: an ordered list of attribute names, each bound to a
//! source field, a literal, a derived value, or nothing at all. Tables are
//! YAML documents (see `config/mappings/`) compiled into the binary and
//! optionally overridden from a directory.

pub mod loader;

use std::fmt;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::Variant;
use crate::error::MappingError;
use crate::record::RawRecord;
use crate::value::FieldValue;

pub use loader::{MappingDocument, BUILTIN_DOCUMENTS};

/// Tables shared by every contact block, in creation order.
pub const CONTACT_TABLES: [&str; 3] = ["Contact", "ContactAddress", "ContactName"];

/// The shared, parentless correspondence address table.
pub const CORRESPONDENCE_ADDRESS: &str = "CorrespondenceAddress";

/// Values computed by the builder rather than read from the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedValue {
    NodeId,
    ParentNodeId,
    ObjectId,
    RootObjectId,
    ContactId,
    SourceNodeId,
    Role,
    Now,
}

impl DerivedValue {
    pub fn as_str(self) -> &'static str {
        match self {
            DerivedValue::NodeId => "node_id",
            DerivedValue::ParentNodeId => "parent_node_id",
            DerivedValue::ObjectId => "object_id",
            DerivedValue::RootObjectId => "root_object_id",
            DerivedValue::ContactId => "contact_id",
            DerivedValue::SourceNodeId => "source_node_id",
            DerivedValue::Role => "role",
            DerivedValue::Now => "now",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactRole {
    Holder,
    Applicant,
    Representative,
}

impl ContactRole {
    pub const ALL: [ContactRole; 3] = [
        ContactRole::Holder,
        ContactRole::Applicant,
        ContactRole::Representative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContactRole::Holder => "holder",
            ContactRole::Applicant => "applicant",
            ContactRole::Representative => "representative",
        }
    }

    /// Suffix of the variant's role link table (`RUTmkHolder`, ...).
    pub fn link_suffix(self) -> &'static str {
        match self {
            ContactRole::Holder => "Holder",
            ContactRole::Applicant => "Applicant",
            ContactRole::Representative => "Representative",
        }
    }

    /// Roles a non-empty holder field produces for `variant`.
    pub fn owner_roles(variant: Variant) -> &'static [ContactRole] {
        if variant.is_appellation() {
            &[ContactRole::Applicant]
        } else {
            &[ContactRole::Holder, ContactRole::Applicant]
        }
    }
}

impl fmt::Display for ContactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one attribute takes its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeSource {
    Absent,
    Field(String),
    Literal(FieldValue),
    Derived(DerivedValue),
}

/// Identifiers and context the builder knows about the node being populated.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub object_id: Uuid,
    pub root_object_id: Uuid,
    pub node_id: Uuid,
    pub parent_node_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub source_node_id: Option<Uuid>,
    pub role: Option<ContactRole>,
    pub timestamp: NaiveDateTime,
}

impl NodeContext {
    pub fn new(object_id: Uuid, root_object_id: Uuid, node_id: Uuid, timestamp: NaiveDateTime) -> Self {
        Self {
            object_id,
            root_object_id,
            node_id,
            parent_node_id: None,
            contact_id: None,
            source_node_id: None,
            role: None,
            timestamp,
        }
    }

    pub fn with_parent(mut self, parent_node_id: Uuid) -> Self {
        self.parent_node_id = Some(parent_node_id);
        self
    }

    pub fn with_contact(mut self, contact_id: Uuid, role: ContactRole) -> Self {
        self.contact_id = Some(contact_id);
        self.role = Some(role);
        self
    }

    pub fn with_role(mut self, role: ContactRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_source_node(mut self, source_node_id: Uuid) -> Self {
        self.source_node_id = Some(source_node_id);
        self
    }

    fn derive(&self, attribute: &str, derived: DerivedValue) -> Result<FieldValue, MappingError> {
        let missing = || MappingError::MissingDerived {
            attribute: attribute.to_string(),
            derived: derived.as_str(),
        };
        let value = match derived {
            DerivedValue::NodeId => FieldValue::Guid(self.node_id),
            DerivedValue::ObjectId => FieldValue::Guid(self.object_id),
            DerivedValue::RootObjectId => FieldValue::Guid(self.root_object_id),
            DerivedValue::ParentNodeId => FieldValue::Guid(self.parent_node_id.ok_or_else(missing)?),
            DerivedValue::ContactId => FieldValue::Guid(self.contact_id.ok_or_else(missing)?),
            DerivedValue::SourceNodeId => FieldValue::Guid(self.source_node_id.ok_or_else(missing)?),
            DerivedValue::Role => {
                FieldValue::Text(self.role.ok_or_else(missing)?.as_str().to_string())
            }
            DerivedValue::Now => FieldValue::DateTime(self.timestamp),
        };
        Ok(value)
    }
}

impl AttributeSource {
    /// Resolve the raw (not yet normalized) value for one attribute.
    ///
    /// A field key the record does not carry resolves to null.
    pub fn resolve(
        &self,
        attribute: &str,
        record: &RawRecord,
        ctx: &NodeContext,
    ) -> Result<FieldValue, MappingError> {
        match self {
            AttributeSource::Absent => Ok(FieldValue::Null),
            AttributeSource::Field(key) => Ok(record.get(key).cloned().unwrap_or(FieldValue::Null)),
            AttributeSource::Literal(value) => Ok(value.clone()),
            AttributeSource::Derived(derived) => ctx.derive(attribute, *derived),
        }
    }
}

/// Ordered attribute bindings for one node table.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeTable {
    name: String,
    attributes: IndexMap<String, AttributeSource>,
}

impl AttributeTable {
    pub fn new(name: impl Into<String>, attributes: IndexMap<String, AttributeSource>) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeSource)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn source(&self, attribute: &str) -> Option<&AttributeSource> {
        self.attributes.get(attribute)
    }

    /// Expand the table against a record, in declaration order.
    pub fn expand(
        &self,
        record: &RawRecord,
        ctx: &NodeContext,
    ) -> Result<Vec<(String, FieldValue)>, MappingError> {
        self.iter()
            .map(|(name, source)| Ok((name.to_string(), source.resolve(name, record, ctx)?)))
            .collect()
    }
}

/// Every table the builder may request.
#[derive(Debug, Clone, Default)]
pub struct MappingSet {
    tables: IndexMap<String, AttributeTable>,
    contacts: IndexMap<ContactRole, IndexMap<String, AttributeTable>>,
}

impl MappingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Result<&AttributeTable, MappingError> {
        self.tables
            .get(name)
            .ok_or_else(|| MappingError::UnknownTable(name.to_string()))
    }

    pub fn contact_table(&self, role: ContactRole, name: &str) -> Result<&AttributeTable, MappingError> {
        self.contacts
            .get(&role)
            .and_then(|tables| tables.get(name))
            .ok_or_else(|| MappingError::UnknownTable(format!("{}.{}", role, name)))
    }

    pub fn insert_table(&mut self, table: AttributeTable) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn insert_contact_table(&mut self, role: ContactRole, table: AttributeTable) {
        self.contacts
            .entry(role)
            .or_default()
            .insert(table.name.clone(), table);
    }

    pub fn tables(&self) -> impl Iterator<Item = &AttributeTable> {
        self.tables.values()
    }

    pub fn contact_tables(&self) -> impl Iterator<Item = (ContactRole, &AttributeTable)> {
        self.contacts
            .iter()
            .flat_map(|(role, tables)| tables.values().map(move |t| (*role, t)))
    }

    /// Table names the builder may request for `variant`.
    pub fn required_tables(variant: Variant) -> Vec<String> {
        let mut names = vec![variant.main_table().to_string()];
        if variant.is_trademark() {
            names.push(variant.sub_table("Priority"));
            names.push(variant.sub_table("GoodsServices"));
        }
        if variant.has_disclaimer() {
            names.push(variant.sub_table("Disclaimer"));
        }
        names.push(CORRESPONDENCE_ADDRESS.to_string());
        names.push(variant.sub_table(CORRESPONDENCE_ADDRESS));
        for role in ContactRole::owner_roles(variant) {
            names.push(variant.sub_table(role.link_suffix()));
        }
        names.push(variant.sub_table(ContactRole::Representative.link_suffix()));
        if let Some(table) = variant.representation_table() {
            names.push(table.to_string());
        }
        names
    }

    /// Check that every table the builder may request exists and that no
    /// literal dispatches to a slot the attribute row cannot hold.
    pub fn validate(&self) -> Result<(), String> {
        let mut missing = Vec::new();
        for variant in Variant::ALL {
            for name in Self::required_tables(variant) {
                if !self.tables.contains_key(&name) && !missing.contains(&name) {
                    missing.push(name);
                }
            }
        }
        for role in ContactRole::ALL {
            for name in CONTACT_TABLES {
                if self.contact_table(role, name).is_err() {
                    missing.push(format!("{}.{}", role, name));
                }
            }
        }
        if !missing.is_empty() {
            return Err(format!("Missing mapping tables: {}", missing.join(", ")));
        }

        let all = self.tables().chain(self.contact_tables().map(|(_, t)| t));
        for table in all {
            for (name, source) in table.iter() {
                if let AttributeSource::Literal(FieldValue::Float(_) | FieldValue::Bool(_)) = source {
                    return Err(format!(
                        "Table '{}' attribute '{}': float and boolean literals cannot be stored",
                        table.name, name
                    ));
                }
            }
        }
        Ok(())
    }
}
