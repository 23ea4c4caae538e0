//! `plan` runs: mapping overrides flow into the built rows, and the row
//! buffers dump to NDJSON.

use std::fs;
use std::sync::Arc;

use registry_eav::{
    dump, ArchiveIngestor, BuildSettings, GraphBuilder, MappingSet, MemorySink, Migrator,
    PipelineSettings, SourceReader, TextPolicy,
};

fn migrator(mappings: MappingSet, sink: Arc<MemorySink>, archive: &std::path::Path) -> Migrator {
    let builder = GraphBuilder::new(
        Arc::new(mappings),
        TextPolicy::default(),
        Arc::new(ArchiveIngestor::new(archive, "/published")),
        BuildSettings::for_package("205"),
    );
    Migrator::new(sink, builder, PipelineSettings::default())
}

#[tokio::test]
async fn test_plan_dump_matches_counts() {
    let source = tempfile::tempdir().unwrap();
    fs::write(
        source.path().join("MD_MAINS.ndjson"),
        [
            r#"{"NSER": 1, "NTM": "1000000", "OWN": "Holder"}"#,
            r#"{"NSER": 2, "NTM": "2000000"}"#,
            r#"{"NSER": 3000, "NTM": "3000000"}"#,
        ]
        .join("\n"),
    )
    .unwrap();

    let sink = Arc::new(MemorySink::new());
    let migrator = migrator(MappingSet::builtin().unwrap(), sink.clone(), source.path());
    let reader = SourceReader::new(source.path(), 0..100);
    let plan = migrator.plan(&reader).await.unwrap();

    assert_eq!(plan.report.records_read, 2);
    assert_eq!(plan.report.records_migrated, 2);
    // plan never loads
    assert_eq!(sink.counts().objects, 0);

    let out = source.path().join("plan");
    let counts = dump::write_rows(&out, &plan.rows).unwrap();
    assert_eq!(counts, plan.report.tables);

    let attributes = fs::read_to_string(out.join("attributes.ndjson")).unwrap();
    assert_eq!(attributes.lines().count(), counts.attributes);
    let first: serde_json::Value = serde_json::from_str(attributes.lines().next().unwrap()).unwrap();
    assert_eq!(first["created_by"], "EA_Migration_205");

    let parentless = fs::read_to_string(out.join("nodes_parentless.ndjson")).unwrap();
    for line in parentless.lines() {
        let node: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(node.get("parent_attr_id").is_none());
    }
}

#[tokio::test]
async fn test_mapping_override_changes_rows() {
    let overrides = tempfile::tempdir().unwrap();
    fs::write(
        overrides.path().join("goods.yaml"),
        r#"
tables:
  RUTmkGoodsServices:
    goods_text: GOODS
    goods_source: { literal: "MD_GOODS" }
    goods_node: { derived: node_id }
"#,
    )
    .unwrap();
    let mappings = MappingSet::load_with_overrides(overrides.path()).unwrap();

    let source = tempfile::tempdir().unwrap();
    fs::write(
        source.path().join("MD_MAINS.ndjson"),
        r#"{"NSER": 7, "NTM": "7000000", "GOODS": "09 software"}"#,
    )
    .unwrap();

    let sink = Arc::new(MemorySink::new());
    let plan = migrator(mappings, sink, source.path())
        .plan(&SourceReader::new(source.path(), 0..100))
        .await
        .unwrap();

    let goods = plan.rows.nodes_named("RUTmkGoodsServices").next().unwrap();
    let attrs: Vec<_> = plan.rows.attributes_of(goods.id).collect();
    assert_eq!(attrs.len(), 3);
    assert_eq!(attrs[0].text_value.as_deref(), Some("09 software"));
    assert_eq!(attrs[1].text_value.as_deref(), Some("MD_GOODS"));
    assert_eq!(attrs[2].guid_value, Some(goods.id));
    assert_eq!(attrs[2].kind, 6);
}
