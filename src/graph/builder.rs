//! Record-to-graph construction.
//!
//! One call to [`GraphBuilder::build`] turns one classified record into the
//! rows of its storage-object subtree:
//!
//! ```text
//! root object
//! ├── main node                     (or the linked primary-appellation node)
//! │   ├── <prefix>Priority          trademarks
//! │   ├── <prefix>GoodsServices     trademarks
//! │   ├── <prefix>Disclaimer        trademarks, primary appellations
//! │   ├── <prefix>CorrespondenceAddress ──> CorrespondenceAddress (parentless)
//! │   ├── Contact ── ContactAddress, ContactName
//! │   └── <prefix><Role>            one per contact block
//! └── attachment object             images only
//!     └── <Main>RepresentationFile  x2 (original, JPEG)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use uuid::Uuid;

use super::{AttributeRow, NodeRow, RecordGraph, StorageObjectRow, NODE_KIND};
use crate::attachment::{ImageFormat, ImageIngestor, ImagePass, ImageRequest, IngestedImage};
use crate::classify::{Classification, Variant};
use crate::error::{MappingError, RecordError};
use crate::mapping::{AttributeTable, ContactRole, MappingSet, NodeContext, CORRESPONDENCE_ADDRESS};
use crate::record::{fields, RawRecord};
use crate::reconcile::RewritePlan;
use crate::value::{FieldValue, SlotValues, TextPolicy};

/// Per-run constants stamped on every row.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Migration package code, written as the objects' class type.
    pub package: String,
    /// Creator tag on every node and attribute row.
    pub created_by: String,
}

impl BuildSettings {
    pub fn for_package(package: &str) -> Self {
        Self {
            package: package.to_string(),
            created_by: format!("EA_Migration_{}", package),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self::for_package("101")
    }
}

pub struct GraphBuilder {
    mappings: Arc<MappingSet>,
    policy: TextPolicy,
    ingestor: Arc<dyn ImageIngestor>,
    settings: BuildSettings,
}

impl GraphBuilder {
    pub fn new(
        mappings: Arc<MappingSet>,
        policy: TextPolicy,
        ingestor: Arc<dyn ImageIngestor>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            mappings,
            policy,
            ingestor,
            settings,
        }
    }

    /// Build one record's rows.
    ///
    /// `primary_node` is the main node of the primary appellation a
    /// certificate belongs to, when one is known; it is ignored for every
    /// other variant.
    pub fn build(
        &self,
        mut record: RawRecord,
        classification: &Classification,
        plan: &RewritePlan,
        primary_node: Option<Uuid>,
    ) -> Result<RecordGraph, RecordError> {
        let now = Local::now().naive_local();
        let variant = classification.variant;
        let kind = classification.kind_code();

        record.collapse_whitespace(fields::GOODS);
        let received = record
            .get(fields::APPLICATION_DATE)
            .and_then(FieldValue::as_timestamp);

        let root_id = plan.root_id.unwrap_or_else(Uuid::new_v4);
        let mut graph = RecordGraph::new(classification.serial, variant, root_id);
        graph.rows.objects.push(StorageObjectRow::new(
            root_id,
            kind,
            None,
            &self.settings.package,
            received,
            now,
        ));

        let main_table = self.mappings.table(variant.main_table())?;
        let linked = match primary_node {
            Some(node) if variant == Variant::RuAppellationCertificate => Some(node),
            _ => None,
        };
        let main_id = match linked {
            Some(node) => {
                tracing::info!(
                    "Certificate {} attached to appellation node {}",
                    classification.serial,
                    node
                );
                graph.linked = true;
                node
            }
            None => {
                let id = plan.node_id.unwrap_or_else(Uuid::new_v4);
                self.add_node(&mut graph, id, variant.main_table(), root_id, None, now);
                id
            }
        };
        graph.main_node_id = main_id;
        self.populate(&mut graph, main_table, &record, &NodeContext::new(root_id, root_id, main_id, now));

        let mut children = Vec::new();
        if variant.is_trademark() {
            children.push(variant.sub_table("Priority"));
            children.push(variant.sub_table("GoodsServices"));
        }
        if variant.has_disclaimer() {
            children.push(variant.sub_table("Disclaimer"));
        }
        for name in &children {
            let table = self.mappings.table(name)?;
            let id = self.add_node(&mut graph, Uuid::new_v4(), name, root_id, Some(main_id), now);
            let ctx = NodeContext::new(root_id, root_id, id, now).with_parent(main_id);
            self.populate(&mut graph, table, &record, &ctx);
        }

        self.correspondence(&mut graph, &record, variant, root_id, main_id, now)?;

        if record.has_value(fields::HOLDER) {
            for role in ContactRole::owner_roles(variant) {
                self.contact_block(&mut graph, &record, variant, *role, root_id, main_id, now)?;
            }
        }
        if record.has_value(fields::REPRESENTATIVE) {
            let role = ContactRole::Representative;
            self.contact_block(&mut graph, &record, variant, role, root_id, main_id, now)?;
        }

        if record.has_value(fields::IMAGE_PATH) {
            self.attachment(&mut graph, &record, classification, plan, main_id, received, now)?;
        }

        Ok(graph)
    }

    fn add_node(
        &self,
        graph: &mut RecordGraph,
        id: Uuid,
        name: &str,
        object_id: Uuid,
        parent: Option<Uuid>,
        now: NaiveDateTime,
    ) -> Uuid {
        graph.rows.push_node(NodeRow {
            id,
            name: name.to_string(),
            parent_number: object_id,
            parent_attr_id: parent,
            kind: NODE_KIND,
            created_by: self.settings.created_by.clone(),
            created_date: now,
            guid_value: id,
        });
        id
    }

    /// Write the node's attributes; a mapping error stops this node only.
    fn populate(&self, graph: &mut RecordGraph, table: &AttributeTable, record: &RawRecord, ctx: &NodeContext) {
        if let Err(e) = self.write_attributes(graph, table, record, ctx) {
            graph.warn(format!(
                "{} node {} of object {}: {}",
                table.name(),
                ctx.node_id,
                ctx.object_id,
                e
            ));
        }
    }

    fn write_attributes(
        &self,
        graph: &mut RecordGraph,
        table: &AttributeTable,
        record: &RawRecord,
        ctx: &NodeContext,
    ) -> Result<(), MappingError> {
        for (name, source) in table.iter() {
            let value = self.policy.normalize(source.resolve(name, record, ctx)?);
            // an unstorable value drops this attribute only
            let (kind, slots) = match SlotValues::from_value(name, value) {
                Ok(dispatched) => dispatched,
                Err(e) => {
                    graph.warn(format!("{} node {}: {}", table.name(), ctx.node_id, e));
                    continue;
                }
            };
            graph.rows.attributes.push(AttributeRow {
                id: Uuid::new_v4(),
                created_date: ctx.timestamp,
                parent_number: ctx.object_id,
                parent_attr_id: ctx.node_id,
                name: name.to_string(),
                kind: kind.code(),
                text_value: slots.text,
                int_value: slots.int,
                date_value: slots.date,
                guid_value: slots.guid,
                created_by: self.settings.created_by.clone(),
            });
        }
        Ok(())
    }

    fn correspondence(
        &self,
        graph: &mut RecordGraph,
        record: &RawRecord,
        variant: Variant,
        root_id: Uuid,
        main_id: Uuid,
        now: NaiveDateTime,
    ) -> Result<(), MappingError> {
        let shared = self.mappings.table(CORRESPONDENCE_ADDRESS)?;
        let link_name = variant.sub_table(CORRESPONDENCE_ADDRESS);
        let link = self.mappings.table(&link_name)?;

        let address_id = self.add_node(graph, Uuid::new_v4(), CORRESPONDENCE_ADDRESS, root_id, None, now);
        self.populate(graph, shared, record, &NodeContext::new(root_id, root_id, address_id, now));

        let link_id = self.add_node(graph, Uuid::new_v4(), &link_name, root_id, Some(main_id), now);
        let ctx = NodeContext::new(root_id, root_id, link_id, now)
            .with_parent(main_id)
            .with_source_node(address_id);
        self.populate(graph, link, record, &ctx);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn contact_block(
        &self,
        graph: &mut RecordGraph,
        record: &RawRecord,
        variant: Variant,
        role: ContactRole,
        root_id: Uuid,
        main_id: Uuid,
        now: NaiveDateTime,
    ) -> Result<(), MappingError> {
        let [contact, address, name] = crate::mapping::CONTACT_TABLES;
        let link_name = variant.sub_table(role.link_suffix());
        let contact_table = self.mappings.contact_table(role, contact)?;
        let inner = [
            (address, self.mappings.contact_table(role, address)?),
            (name, self.mappings.contact_table(role, name)?),
        ];
        let link_table = self.mappings.table(&link_name)?;

        let contact_id = self.add_node(graph, Uuid::new_v4(), contact, root_id, Some(main_id), now);
        let ctx = NodeContext::new(root_id, root_id, contact_id, now)
            .with_parent(main_id)
            .with_contact(contact_id, role);
        self.populate(graph, contact_table, record, &ctx);

        for (table_name, table) in inner {
            let id = self.add_node(graph, Uuid::new_v4(), table_name, root_id, Some(contact_id), now);
            let ctx = NodeContext::new(root_id, root_id, id, now)
                .with_parent(contact_id)
                .with_contact(contact_id, role);
            self.populate(graph, table, record, &ctx);
        }

        let link_id = self.add_node(graph, Uuid::new_v4(), &link_name, root_id, Some(main_id), now);
        let ctx = NodeContext::new(root_id, root_id, link_id, now)
            .with_parent(main_id)
            .with_contact(contact_id, role);
        self.populate(graph, link_table, record, &ctx);
        Ok(())
    }

    /// Archive the record's image in both formats and attach the results.
    /// Any ingestion failure skips the whole attachment.
    #[allow(clippy::too_many_arguments)]
    fn attachment(
        &self,
        graph: &mut RecordGraph,
        record: &RawRecord,
        classification: &Classification,
        plan: &RewritePlan,
        main_id: Uuid,
        received: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> Result<(), MappingError> {
        let serial = classification.serial;
        let Some(table_name) = classification.variant.representation_table() else {
            graph.warn(format!(
                "Record {} ({}) carries an image but the variant has no representation table",
                serial, classification.variant
            ));
            return Ok(());
        };
        let table = self.mappings.table(table_name)?;

        let type_tag = record.text(fields::IMAGE_TYPE).unwrap_or_default();
        let Some(source_format) = ImageFormat::from_tag(type_tag) else {
            graph.warn(format!("Record {}: unsupported image type '{}'", serial, type_tag));
            return Ok(());
        };
        let root_id = graph.root_object_id;
        let attachment_id = plan.attachment_id.unwrap_or_else(Uuid::new_v4);
        let request = ImageRequest {
            source: PathBuf::from(record.text(fields::IMAGE_PATH).unwrap_or_default()),
            source_format,
            name: record
                .text(fields::IMAGE_NAME)
                .map(str::to_string)
                .unwrap_or_else(|| serial.to_string()),
            root_object_id: root_id,
            attachment_id,
            date: received.unwrap_or(now).date(),
        };

        let mut images: Vec<IngestedImage> = Vec::with_capacity(2);
        for pass in ImagePass::ALL {
            match self.ingestor.ingest(&request, pass) {
                Ok(image) => images.push(image),
                Err(e) => {
                    graph.warn(format!(
                        "Record {}: image {} skipped: {}",
                        serial,
                        request.source.display(),
                        e
                    ));
                    return Ok(());
                }
            }
        }

        graph.rows.objects.push(StorageObjectRow::new(
            attachment_id,
            classification.kind_code(),
            Some(root_id),
            &self.settings.package,
            received,
            now,
        ));
        for image in images {
            let id = self.add_node(graph, Uuid::new_v4(), table_name, attachment_id, Some(main_id), now);
            let ctx = NodeContext::new(attachment_id, root_id, id, now).with_parent(main_id);
            self.populate(graph, table, &image.to_record(), &ctx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::error::ImageIngestionError;
    use crate::record::SerialNumber;

    struct FakeIngestor {
        fail: bool,
    }

    impl ImageIngestor for FakeIngestor {
        fn ingest(&self, request: &ImageRequest, pass: ImagePass) -> Result<IngestedImage, ImageIngestionError> {
            if self.fail {
                return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "broken").into());
            }
            Ok(IngestedImage {
                file_path: format!("/archive/{}", request.file_name(pass)),
                file_name: request.file_name(pass),
                format: request.target_format(pass),
                content: request.attachment_id,
                height: 10,
                width: 20,
            })
        }
    }

    fn builder(fail_images: bool) -> GraphBuilder {
        GraphBuilder::new(
            Arc::new(MappingSet::builtin().unwrap()),
            TextPolicy::default(),
            Arc::new(FakeIngestor { fail: fail_images }),
            BuildSettings::default(),
        )
    }

    fn trademark(serial: i64, ntm: &str) -> RawRecord {
        RawRecord::new()
            .with_value("NSER", FieldValue::Int(serial))
            .with_text("NTM", ntm)
            .with_text("NAP", "2001700001")
            .with_text("OWN", "")
            .with_text("NPP", "")
    }

    fn build(builder: &GraphBuilder, mut record: RawRecord) -> RecordGraph {
        let c = classify(&mut record).unwrap();
        builder.build(record, &c, &RewritePlan::fresh(), None).unwrap()
    }

    #[test]
    fn test_plain_trademark_shape() {
        let graph = build(&builder(false), trademark(1, "1234500"));
        let rows = &graph.rows;

        assert_eq!(rows.objects.len(), 1);
        assert!(rows.objects[0].is_root());
        assert_eq!(rows.objects[0].class_type, "101");
        for name in [
            "RUTrademark",
            "RUTmkPriority",
            "RUTmkGoodsServices",
            "RUTmkDisclaimer",
            "CorrespondenceAddress",
            "RUTmkCorrespondenceAddress",
        ] {
            assert_eq!(rows.nodes_named(name).count(), 1, "{}", name);
        }
        assert_eq!(rows.parentless_nodes.len(), 2);
        assert_eq!(rows.parented_nodes.len(), 4);
        assert_eq!(rows.nodes_named("Contact").count(), 0);
        assert!(graph.warnings.is_empty());
    }

    #[test]
    fn test_every_attribute_has_one_slot_matching_kind() {
        let graph = build(&builder(false), trademark(2, "1234500").with_text("OWN", "ACME"));
        for attr in &graph.rows.attributes {
            let populated = [
                attr.text_value.is_some(),
                attr.int_value.is_some(),
                attr.date_value.is_some(),
                attr.guid_value.is_some(),
            ];
            assert!(populated.iter().filter(|p| **p).count() <= 1);
            let expected = if attr.int_value.is_some() {
                1
            } else if attr.date_value.is_some() {
                3
            } else if attr.guid_value.is_some() {
                6
            } else {
                0
            };
            assert_eq!(attr.kind, expected, "{}", attr.name);
            assert_eq!(attr.created_by, "EA_Migration_101");
        }
    }

    #[test]
    fn test_holder_creates_holder_and_applicant_blocks() {
        let graph = build(&builder(false), trademark(3, "1234500").with_text("OWN", "ACME"));
        let rows = &graph.rows;
        assert_eq!(rows.nodes_named("Contact").count(), 2);
        assert_eq!(rows.nodes_named("ContactAddress").count(), 2);
        assert_eq!(rows.nodes_named("RUTmkHolder").count(), 1);
        assert_eq!(rows.nodes_named("RUTmkApplicant").count(), 1);

        let holder = rows.nodes_named("RUTmkHolder").next().unwrap();
        let contact_ref = rows
            .attributes_of(holder.id)
            .find(|a| a.name == "contact_uid")
            .unwrap();
        let contact_ids: Vec<Uuid> = rows.nodes_named("Contact").map(|n| n.id).collect();
        assert!(contact_ids.contains(&contact_ref.guid_value.unwrap()));
    }

    #[test]
    fn test_appellation_gets_applicant_only() {
        let record = trademark(4, "77700")
            .with_text("WCD", "N")
            .with_text("OWN", "Vineyard")
            .with_text("NPP", "Petrov");
        let graph = build(&builder(false), record);
        let rows = &graph.rows;
        assert_eq!(rows.nodes_named("RUAplApplicant").count(), 1);
        assert_eq!(rows.nodes_named("RUAplRepresentative").count(), 1);
        assert_eq!(rows.nodes().filter(|n| n.name.ends_with("Holder")).count(), 0);
        assert_eq!(rows.nodes_named("RUAplDisclaimer").count(), 1);
    }

    #[test]
    fn test_correspondence_link_references_parentless_node() {
        let graph = build(&builder(false), trademark(5, "1234500"));
        let rows = &graph.rows;
        let shared = rows.nodes_named("CorrespondenceAddress").next().unwrap();
        assert!(shared.parent_attr_id.is_none());

        let link = rows.nodes_named("RUTmkCorrespondenceAddress").next().unwrap();
        assert_eq!(link.parent_attr_id, Some(graph.main_node_id));
        let source = rows
            .attributes_of(link.id)
            .find(|a| a.name == "address_uid")
            .unwrap();
        assert_eq!(source.guid_value, Some(shared.id));
    }

    #[test]
    fn test_rewrite_reuses_ids() {
        let builder = builder(false);
        let mut record = trademark(6, "1234500");
        let c = classify(&mut record).unwrap();
        let plan = RewritePlan {
            rewrite: true,
            root_id: Some(Uuid::new_v4()),
            node_id: Some(Uuid::new_v4()),
            attachment_id: None,
        };
        let graph = builder.build(record, &c, &plan, None).unwrap();
        assert_eq!(Some(graph.root_object_id), plan.root_id);
        assert_eq!(Some(graph.main_node_id), plan.node_id);
        assert_eq!(graph.rows.objects[0].number, plan.root_id.unwrap());
    }

    #[test]
    fn test_certificate_links_to_primary_node() {
        let builder = builder(false);
        let mut record = trademark(7, "12307").with_text("WCD", "N");
        let c = classify(&mut record).unwrap();
        let primary = Uuid::new_v4();

        let graph = builder.build(record, &c, &RewritePlan::fresh(), Some(primary)).unwrap();
        assert!(graph.linked);
        assert_eq!(graph.main_node_id, primary);
        assert_eq!(graph.rows.nodes_named("RUAppellationCertificate").count(), 0);
        assert!(graph.rows.attributes_of(primary).any(|a| a.name == "retro_number"));
        assert_eq!(graph.rows.nodes_named("RUAplCertDisclaimer").count(), 0);
    }

    #[test]
    fn test_standalone_certificate() {
        let graph = build(&builder(false), trademark(8, "12307").with_text("WCD", "N"));
        assert!(!graph.linked);
        assert_eq!(graph.rows.nodes_named("RUAppellationCertificate").count(), 1);
    }

    #[test]
    fn test_image_creates_attachment_with_two_files() {
        let record = trademark(9, "1234500")
            .with_text("IMAGE_PATH", "/img/9.TIF")
            .with_text("IMAGE_NAME", "9")
            .with_text("IMAGE_TYPE", "TIFF");
        let graph = build(&builder(false), record);
        let rows = &graph.rows;

        assert_eq!(rows.objects.len(), 2);
        let attachment = &rows.objects[1];
        assert_eq!(attachment.parent_number, graph.root_object_id.to_string());
        assert_eq!(attachment.kind, 100001);

        let files: Vec<&NodeRow> = rows.nodes_named("RUTrademarkRepresentationFile").collect();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.parent_number == attachment.number));
        let types: Vec<String> = files
            .iter()
            .filter_map(|f| rows.attributes_of(f.id).find(|a| a.name == "file_type"))
            .filter_map(|a| a.text_value.clone())
            .collect();
        assert_eq!(types, vec!["TIFF", "JPEG"]);
    }

    #[test]
    fn test_failed_ingestion_skips_attachment() {
        let record = trademark(10, "1234500")
            .with_text("IMAGE_PATH", "/img/10.TIF")
            .with_text("IMAGE_TYPE", "TIFF");
        let graph = build(&builder(true), record);
        assert_eq!(graph.rows.objects.len(), 1);
        assert_eq!(graph.rows.nodes_named("RUTrademarkRepresentationFile").count(), 0);
        assert_eq!(graph.warnings.len(), 1);
    }

    #[test]
    fn test_goods_whitespace_collapsed_and_quotes_replaced() {
        let record = trademark(11, "1234500")
            .with_text("GOODS", "09  -  computers\n  and  O'Brien")
            .with_text("DPUB", "TM_DAT__");
        let graph = build(&builder(false), record);
        let rows = &graph.rows;
        let goods_node = rows.nodes_named("RUTmkGoodsServices").next().unwrap();
        let goods = rows
            .attributes_of(goods_node.id)
            .find(|a| a.name == "goods_text")
            .unwrap();
        assert_eq!(goods.text_value.as_deref(), Some("09 - computers and O`Brien"));

        let reg_date = rows
            .attributes_of(graph.main_node_id)
            .find(|a| a.name == "reg_date")
            .unwrap();
        assert_eq!(reg_date.text_value, None);
        assert_eq!(reg_date.kind, 0);
    }

    #[test]
    fn test_unstorable_value_drops_only_its_attribute() {
        let mut mappings = MappingSet::builtin().unwrap();
        let mut attrs = indexmap::IndexMap::new();
        attrs.insert("first".to_string(), crate::mapping::AttributeSource::Absent);
        attrs.insert(
            "ratio".to_string(),
            crate::mapping::AttributeSource::Literal(FieldValue::Float(0.5)),
        );
        attrs.insert("never".to_string(), crate::mapping::AttributeSource::Absent);
        mappings.insert_table(AttributeTable::new("RUTmkDisclaimer", attrs));
        let builder = GraphBuilder::new(
            Arc::new(mappings),
            TextPolicy::default(),
            Arc::new(FakeIngestor { fail: false }),
            BuildSettings::default(),
        );

        let graph = build(&builder, trademark(12, "1234500"));
        let node = graph.rows.nodes_named("RUTmkDisclaimer").next().unwrap();
        let names: Vec<&str> = graph
            .rows
            .attributes_of(node.id)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "never"]);
        assert_eq!(graph.warnings.len(), 1);
        assert!(graph.warnings[0].contains("ratio"));
        assert_eq!(graph.serial, SerialNumber(12));
    }
}
