//! Insertable row models for the four bulk-load shapes.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use super::schema::{objects, search_attributes};
use crate::graph::{AttributeRow, NodeRow, StorageObjectRow};

#[derive(Debug, Insertable)]
#[diesel(table_name = objects)]
pub struct NewObject<'a> {
    pub number: String,
    pub kind: i32,
    pub parent_number: &'a str,
    pub structure_id: &'a str,
    pub update_date: NaiveDateTime,
    pub created_date: NaiveDateTime,
    pub state: &'a str,
    pub oper_storage_period: NaiveDateTime,
    pub temp_storage_period: NaiveDateTime,
    pub class_type: &'a str,
    pub last_storage_period: NaiveDateTime,
    pub version: &'a str,
    pub received: Option<NaiveDateTime>,
}

impl<'a> From<&'a StorageObjectRow> for NewObject<'a> {
    fn from(row: &'a StorageObjectRow) -> Self {
        NewObject {
            number: row.number.to_string(),
            kind: row.kind,
            parent_number: &row.parent_number,
            structure_id: &row.structure_id,
            update_date: row.update_date,
            created_date: row.created_date,
            state: &row.state,
            oper_storage_period: row.oper_storage_period,
            temp_storage_period: row.temp_storage_period,
            class_type: &row.class_type,
            last_storage_period: row.last_storage_period,
            version: &row.version,
            received: row.received,
        }
    }
}

/// 7-column node row.
#[derive(Debug, Insertable)]
#[diesel(table_name = search_attributes)]
pub struct NewParentlessNode<'a> {
    pub id: String,
    pub name: &'a str,
    pub parent_number: String,
    pub kind: i32,
    pub created_by: &'a str,
    pub created_date: NaiveDateTime,
    pub guid_value: Option<String>,
}

impl<'a> From<&'a NodeRow> for NewParentlessNode<'a> {
    fn from(row: &'a NodeRow) -> Self {
        NewParentlessNode {
            id: row.id.to_string(),
            name: &row.name,
            parent_number: row.parent_number.to_string(),
            kind: row.kind,
            created_by: &row.created_by,
            created_date: row.created_date,
            guid_value: Some(row.guid_value.to_string()),
        }
    }
}

/// 8-column node row.
#[derive(Debug, Insertable)]
#[diesel(table_name = search_attributes)]
pub struct NewParentedNode<'a> {
    pub id: String,
    pub name: &'a str,
    pub parent_number: String,
    pub parent_attr_id: Option<String>,
    pub kind: i32,
    pub created_by: &'a str,
    pub created_date: NaiveDateTime,
    pub guid_value: Option<String>,
}

impl<'a> From<&'a NodeRow> for NewParentedNode<'a> {
    fn from(row: &'a NodeRow) -> Self {
        NewParentedNode {
            id: row.id.to_string(),
            name: &row.name,
            parent_number: row.parent_number.to_string(),
            parent_attr_id: row.parent_attr_id.map(|p| p.to_string()),
            kind: row.kind,
            created_by: &row.created_by,
            created_date: row.created_date,
            guid_value: Some(row.guid_value.to_string()),
        }
    }
}

/// 11-column attribute row.
#[derive(Debug, Insertable)]
#[diesel(table_name = search_attributes)]
pub struct NewAttribute<'a> {
    pub id: String,
    pub created_date: NaiveDateTime,
    pub parent_number: String,
    pub parent_attr_id: Option<String>,
    pub name: &'a str,
    pub kind: i32,
    pub text_value: Option<&'a str>,
    pub int_value: Option<i64>,
    pub date_value: Option<NaiveDateTime>,
    pub guid_value: Option<String>,
    pub created_by: &'a str,
}

impl<'a> From<&'a AttributeRow> for NewAttribute<'a> {
    fn from(row: &'a AttributeRow) -> Self {
        NewAttribute {
            id: row.id.to_string(),
            created_date: row.created_date,
            parent_number: row.parent_number.to_string(),
            parent_attr_id: Some(row.parent_attr_id.to_string()),
            name: &row.name,
            kind: row.kind,
            text_value: row.text_value.as_deref(),
            int_value: row.int_value,
            date_value: row.date_value,
            guid_value: row.guid_value.map(|g| g.to_string()),
            created_by: &row.created_by,
        }
    }
}

/// Columns read back when loading prior attributes.
#[derive(Debug, Queryable)]
pub struct PriorAttributeRecord {
    pub id: String,
    pub parent_number: String,
    pub parent_attr_id: Option<String>,
    pub name: String,
    pub text_value: Option<String>,
    pub int_value: Option<i64>,
}

#[derive(Debug, Queryable)]
pub struct PriorNodeRecord {
    pub id: String,
    pub parent_number: String,
    pub name: String,
}

#[derive(Debug, Queryable)]
pub struct PriorObjectRecord {
    pub number: String,
    pub parent_number: String,
    pub class_type: String,
}
