//! Registry exports on disk.
//!
//! The source directory holds NDJSON exports of the legacy tables:
//!
//! - `MD_MAINS.ndjson`: the primary table, one object per record
//! - `MD_GOODS.ndjson`, `MD_GOOD1.ndjson` .. `MD_GOOD8.ndjson`: goods text
//!   (`GOODS`) keyed by `NSER`; later files win
//! - an image directory holding `<NSER>.TIF` / `<NSER>.JPG` scans
//!
//! [`SourceReader::read`] merges all of it into one [`RawRecord`] per serial.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::attachment::ImageFormat;
use crate::error::MigrationError;
use crate::record::{fields, RawRecord, SerialNumber};
use crate::value::FieldValue;

pub const MAIN_TABLE_FILE: &str = "MD_MAINS.ndjson";
pub const GOODS_TABLE_COUNT: usize = 9;

/// `MD_GOODS.ndjson` then `MD_GOOD1.ndjson` .. `MD_GOOD8.ndjson`.
pub fn goods_table_files() -> Vec<String> {
    (0..GOODS_TABLE_COUNT)
        .map(|n| {
            if n == 0 {
                "MD_GOODS.ndjson".to_string()
            } else {
                format!("MD_GOOD{}.ndjson", n)
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SourceReader {
    directory: PathBuf,
    image_directory: PathBuf,
    serials: Range<i64>,
}

impl SourceReader {
    /// Images default to `<directory>/IMG`.
    pub fn new(directory: impl Into<PathBuf>, serials: Range<i64>) -> Self {
        let directory = directory.into();
        let image_directory = directory.join("IMG");
        Self {
            directory,
            image_directory,
            serials,
        }
    }

    pub fn with_image_directory(mut self, image_directory: impl Into<PathBuf>) -> Self {
        self.image_directory = image_directory.into();
        self
    }

    fn in_range(&self, serial: SerialNumber) -> bool {
        self.serials.contains(&serial.0)
    }

    /// All records in the serial range, ordered by serial.
    ///
    /// Rows without a usable `NSER` are returned after the keyed ones so the
    /// classifier can report them.
    pub fn read(&self) -> Result<Vec<RawRecord>, MigrationError> {
        tracing::info!(
            "Collecting records {}-{} from {}",
            self.serials.start,
            self.serials.end,
            self.directory.display()
        );

        let main_path = self.directory.join(MAIN_TABLE_FILE);
        if !main_path.is_file() {
            return Err(MigrationError::Source(format!(
                "Main table export not found: {}",
                main_path.display()
            )));
        }

        let mut keyed: BTreeMap<SerialNumber, RawRecord> = BTreeMap::new();
        let mut unkeyed = Vec::new();
        for record in read_ndjson(&main_path)? {
            match record.serial() {
                Ok(serial) if self.in_range(serial) => {
                    keyed.insert(serial, record);
                }
                Ok(_) => {}
                Err(_) => unkeyed.push(record),
            }
        }

        for name in goods_table_files() {
            let path = self.directory.join(&name);
            if path.is_file() {
                let merged = self.merge_goods(&path, &mut keyed)?;
                tracing::info!("Merged {} goods rows from {}", merged, name);
            }
        }

        if self.image_directory.is_dir() {
            let found = self.merge_images(&mut keyed);
            tracing::info!("Found {} images in {}", found, self.image_directory.display());
        }

        let mut records: Vec<RawRecord> = keyed.into_values().collect();
        if !unkeyed.is_empty() {
            tracing::warn!("{} main-table rows carry no usable NSER", unkeyed.len());
            records.extend(unkeyed);
        }
        Ok(records)
    }

    fn merge_goods(
        &self,
        path: &Path,
        records: &mut BTreeMap<SerialNumber, RawRecord>,
    ) -> Result<usize, MigrationError> {
        let mut merged = 0;
        for row in read_ndjson(path)? {
            let Ok(serial) = row.serial() else { continue };
            if !self.in_range(serial) {
                continue;
            }
            let (Some(target), Some(goods)) = (records.get_mut(&serial), row.get(fields::GOODS)) else {
                continue;
            };
            target.insert(fields::GOODS, goods.clone());
            merged += 1;
        }
        Ok(merged)
    }

    fn merge_images(&self, records: &mut BTreeMap<SerialNumber, RawRecord>) -> usize {
        let mut found = 0;
        for entry in WalkDir::new(&self.image_directory)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            let Some(format) = ImageFormat::from_tag(ext) else { continue };
            let Ok(serial) = stem.parse::<i64>().map(SerialNumber) else { continue };
            if !self.in_range(serial) {
                continue;
            }
            let Some(record) = records.get_mut(&serial) else { continue };

            // a TIFF scan wins over a JPEG of the same serial
            if record.text(fields::IMAGE_TYPE) == Some(ImageFormat::Tiff.tag()) {
                continue;
            }
            record.insert(fields::IMAGE_PATH, FieldValue::Text(path.display().to_string()));
            record.insert(fields::IMAGE_NAME, FieldValue::Text(stem.to_string()));
            record.insert(fields::IMAGE_TYPE, FieldValue::Text(format.tag().to_string()));
            found += 1;
        }
        found
    }
}

/// Read one NDJSON export; blank lines are skipped.
pub fn read_ndjson(path: &Path) -> Result<Vec<RawRecord>, MigrationError> {
    let file = File::open(path)
        .map_err(|e| MigrationError::Source(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line).map_err(|e| {
            MigrationError::Source(format!("{}:{}: {}", path.display(), line_no + 1, e))
        })?;
        let serde_json::Value::Object(map) = value else {
            return Err(MigrationError::Source(format!(
                "{}:{}: expected a JSON object",
                path.display(),
                line_no + 1
            )));
        };
        records.push(RawRecord::from_json_map(map));
    }
    Ok(records)
}
