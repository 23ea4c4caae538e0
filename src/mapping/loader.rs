//! YAML loading for mapping tables.
//!
//! Document layout:
//!
//! ```yaml
//! tables:
//!   RUTrademark:
//!     rutmk_uid: { derived: node_id }   # builder-computed value
//!     appl_number: NAP                  # source field code
//!     appl_type: ~                      # always null
//!     kind: { literal: 5 }              # constant
//! contacts:
//!   holder:
//!     Contact: { ... }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use super::{AttributeSource, AttributeTable, ContactRole, DerivedValue, MappingSet};
use crate::error::MappingError;
use crate::value::FieldValue;

/// Mapping documents compiled into the binary.
pub const BUILTIN_DOCUMENTS: &[(&str, &str)] = &[
    ("common.yaml", include_str!("../../config/mappings/common.yaml")),
    ("ru_trademark.yaml", include_str!("../../config/mappings/ru_trademark.yaml")),
    ("wk_trademark.yaml", include_str!("../../config/mappings/wk_trademark.yaml")),
    ("madrid_trademark.yaml", include_str!("../../config/mappings/madrid_trademark.yaml")),
    ("ru_appellation.yaml", include_str!("../../config/mappings/ru_appellation.yaml")),
    (
        "ru_appellation_certificate.yaml",
        include_str!("../../config/mappings/ru_appellation_certificate.yaml"),
    ),
];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Field(String),
    Derived { derived: DerivedValue },
    Literal { literal: serde_yaml::Value },
}

type RawTable = IndexMap<String, Option<RawSource>>;

/// One mapping YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingDocument {
    #[serde(default)]
    tables: IndexMap<String, RawTable>,
    #[serde(default)]
    contacts: IndexMap<ContactRole, IndexMap<String, RawTable>>,
}

impl MappingDocument {
    pub fn parse(contents: &str, origin: &str) -> Result<Self, MappingError> {
        serde_yaml::from_str(contents).map_err(|e| {
            MappingError::Load(format!("Failed to parse mapping document {}: {}", origin, e))
        })
    }

    pub fn table_count(&self) -> usize {
        self.tables.len() + self.contacts.values().map(IndexMap::len).sum::<usize>()
    }

    /// Merge into `set`; a table replaces any earlier table of the same name.
    pub fn merge_into(self, set: &mut MappingSet) {
        for (name, raw) in self.tables {
            set.insert_table(convert_table(name, raw));
        }
        for (role, tables) in self.contacts {
            for (name, raw) in tables {
                set.insert_contact_table(role, convert_table(name, raw));
            }
        }
    }
}

fn convert_table(name: String, raw: RawTable) -> AttributeTable {
    let attributes = raw
        .into_iter()
        .map(|(attr, source)| {
            let source = match source {
                None => AttributeSource::Absent,
                Some(RawSource::Field(key)) => AttributeSource::Field(key),
                Some(RawSource::Derived { derived }) => AttributeSource::Derived(derived),
                Some(RawSource::Literal { literal }) => {
                    AttributeSource::Literal(FieldValue::from_yaml(&literal))
                }
            };
            (attr, source)
        })
        .collect();
    AttributeTable::new(name, attributes)
}

impl MappingSet {
    /// The compiled-in tables, validated.
    pub fn builtin() -> Result<Self, MappingError> {
        let mut set = Self::builtin_unvalidated()?;
        set.validate().map_err(MappingError::Load)?;
        set.shrink();
        Ok(set)
    }

    fn builtin_unvalidated() -> Result<Self, MappingError> {
        let mut set = MappingSet::new();
        for (origin, contents) in BUILTIN_DOCUMENTS {
            MappingDocument::parse(contents, origin)?.merge_into(&mut set);
        }
        Ok(set)
    }

    /// Built-in tables overridden by every `*.yaml` / `*.yml` file in `dir`,
    /// applied in file-name order.
    pub fn load_with_overrides<P: AsRef<Path>>(dir: P) -> Result<Self, MappingError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(MappingError::Load(format!(
                "Mapping directory does not exist: {}",
                dir.display()
            )));
        }

        let mut set = Self::builtin_unvalidated()?;
        for path in yaml_files(dir).map_err(MappingError::Load)? {
            let contents = fs::read_to_string(&path).map_err(|e| {
                MappingError::Load(format!("Failed to read mapping file {}: {}", path.display(), e))
            })?;
            let doc = MappingDocument::parse(&contents, &path.display().to_string())?;
            tracing::info!("Loaded {} mapping tables from {}", doc.table_count(), path.display());
            doc.merge_into(&mut set);
        }
        set.validate().map_err(MappingError::Load)?;
        set.shrink();
        Ok(set)
    }

    fn shrink(&mut self) {
        self.tables.shrink_to_fit();
        self.contacts.shrink_to_fit();
    }
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries = fs::read_dir(dir)
        .map_err(|e| format!("Failed to read directory {}: {}", dir.display(), e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("Failed to read directory entry: {}", e))?;
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Variant;
    use crate::mapping::CONTACT_TABLES;

    #[test]
    fn test_parse_source_shapes() {
        let yaml = r#"
tables:
  T:
    a: NAP
    b: ~
    c: { derived: node_id }
    d: { literal: 5 }
    e: { literal: "x" }
"#;
        let mut set = MappingSet::new();
        MappingDocument::parse(yaml, "inline").unwrap().merge_into(&mut set);
        let table = set.table("T").unwrap();

        assert_eq!(table.source("a"), Some(&AttributeSource::Field("NAP".into())));
        assert_eq!(table.source("b"), Some(&AttributeSource::Absent));
        assert_eq!(
            table.source("c"),
            Some(&AttributeSource::Derived(DerivedValue::NodeId))
        );
        assert_eq!(table.source("d"), Some(&AttributeSource::Literal(FieldValue::Int(5))));
        assert_eq!(
            table.source("e"),
            Some(&AttributeSource::Literal(FieldValue::Text("x".into())))
        );
        let order: Vec<&str> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_builtin_tables_cover_every_variant() {
        let set = MappingSet::builtin().unwrap();
        for variant in Variant::ALL {
            for name in MappingSet::required_tables(variant) {
                assert!(set.table(&name).is_ok(), "missing {}", name);
            }
        }
        for role in ContactRole::ALL {
            for name in CONTACT_TABLES {
                assert!(set.contact_table(role, name).is_ok());
            }
        }
    }

    #[test]
    fn test_main_trademark_table_carries_retro_number() {
        let set = MappingSet::builtin().unwrap();
        for variant in Variant::ALL {
            let main = set.table(variant.main_table()).unwrap();
            assert_eq!(
                main.source("retro_number"),
                Some(&AttributeSource::Field("NSER".into())),
                "{}",
                variant
            );
            assert_eq!(
                main.source("reg_number"),
                Some(&AttributeSource::Field("NTM".into()))
            );
        }
    }

    #[test]
    fn test_override_directory_replaces_table() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("override.yaml"),
            "tables:\n  RUTmkDisclaimer:\n    disclaimer_text: { literal: \"none\" }\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = MappingSet::load_with_overrides(dir.path()).unwrap();
        let table = set.table("RUTmkDisclaimer").unwrap();
        assert_eq!(table.len(), 1);
        assert!(set.table("RUTrademark").unwrap().len() > 10);
    }

    #[test]
    fn test_float_literal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("bad.yaml"),
            "tables:\n  RUTmkDisclaimer:\n    ratio: { literal: 0.5 }\n",
        )
        .unwrap();
        let err = MappingSet::load_with_overrides(dir.path()).unwrap_err();
        assert!(matches!(err, MappingError::Load(_)));
        assert!(err.to_string().contains("ratio"));

        let fatal = crate::error::MigrationError::from(err);
        assert!(fatal.to_string().starts_with("Mapping table error"));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        assert!(MappingDocument::parse("tabels: {}\n", "typo").is_err());
    }
}
