//! Run configuration (`registry-eav.yaml`).

use std::fs;
use std::ops::{Range, RangeInclusive};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::MigrationError;
use crate::graph::BuildSettings;
use crate::reconcile::PriorQuery;
use crate::sink::DatabaseConfig;
use crate::value::{TextPolicy, DEFAULT_PLACEHOLDERS};

pub const WORKERS_ENV: &str = "REGISTRY_EAV_WORKERS";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Where archived images are staged and how their paths are published.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Local directory the archive is written under.
    pub staging_root: PathBuf,
    /// Prefix recorded in `file_path` attributes.
    pub published_root: String,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("archive"),
            published_root: "archive".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriorSettings {
    pub creator_prefix: String,
    pub attribute_names: Vec<String>,
    pub class_type_min: i32,
    pub class_type_max: i32,
}

impl Default for PriorSettings {
    fn default() -> Self {
        let query = PriorQuery::default();
        Self {
            creator_prefix: query.creator_prefix,
            attribute_names: query.attribute_names,
            class_type_min: *query.class_types.start(),
            class_type_max: *query.class_types.end(),
        }
    }
}

impl PriorSettings {
    pub fn query(&self) -> PriorQuery {
        PriorQuery {
            creator_prefix: self.creator_prefix.clone(),
            attribute_names: self.attribute_names.clone(),
            class_types: RangeInclusive::new(self.class_type_min, self.class_type_max),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory holding the NDJSON exports.
    pub source_dir: PathBuf,
    /// Scanned image directory; `<source_dir>/IMG` when unset.
    pub image_dir: Option<PathBuf>,
    /// First serial number migrated (inclusive).
    pub serial_start: i64,
    /// Serial number the run stops before (exclusive).
    pub serial_end: i64,
    pub workers: usize,
    pub batch_size: usize,
    /// Migration package code; the creator tag is derived from it.
    pub package: String,
    pub strip_non_ascii: bool,
    pub placeholders: Vec<String>,
    /// Directory of mapping overrides applied over the built-in tables.
    pub mappings_dir: Option<PathBuf>,
    pub archive: ArchiveSettings,
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
    pub prior: PriorSettings,
    pub log_level: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("data"),
            image_dir: None,
            serial_start: 0,
            serial_end: 1_000_000,
            workers: 8,
            batch_size: 2000,
            package: "101".to_string(),
            strip_non_ascii: true,
            placeholders: DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect(),
            mappings_dir: None,
            archive: ArchiveSettings::default(),
            database_url: None,
            database: DatabaseConfig::default(),
            prior: PriorSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl MigrationConfig {
    /// Load a configuration file and apply environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file can't be read, isn't valid YAML, or holds
    /// values that fail [`MigrationConfig::validate`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, MigrationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, MigrationError> {
        serde_yaml::from_str(contents)
            .map_err(|e| MigrationError::Config(format!("Failed to parse YAML: {}", e)))
    }

    /// `REGISTRY_EAV_WORKERS` and `DATABASE_URL` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(WORKERS_ENV) {
            match value.parse() {
                Ok(workers) => self.workers = workers,
                Err(_) => tracing::warn!("Ignoring {}={}: not a number", WORKERS_ENV, value),
            }
        }
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            self.database_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.workers == 0 {
            return Err(MigrationError::Config("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(MigrationError::Config("batch_size must be at least 1".into()));
        }
        if self.serial_start >= self.serial_end {
            return Err(MigrationError::Config(format!(
                "Empty serial range {}..{}",
                self.serial_start, self.serial_end
            )));
        }
        if self.package.trim().is_empty() {
            return Err(MigrationError::Config("package must not be empty".into()));
        }
        Ok(())
    }

    pub fn serial_range(&self) -> Range<i64> {
        self.serial_start..self.serial_end
    }

    pub fn text_policy(&self) -> TextPolicy {
        TextPolicy::new(self.strip_non_ascii, self.placeholders.iter().cloned())
    }

    pub fn build_settings(&self) -> BuildSettings {
        BuildSettings::for_package(&self.package)
    }
}
