//! Image attachment ingestion.
//!
//! Every trademark image is archived twice: once copied in its original
//! format and once re-encoded as JPEG. Archived files land under
//! `<YYYY>/<MM>/<DD>/<root-hex>/<attachment-hex>/TRADEMARK_IMAGE/` and are
//! named `<attachment-hex>_<n>_<image-name>.<EXT>`, where `n` is 1 unless the
//! re-encoded copy would overwrite a JPEG original, in which case it is 2.

use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ImageIngestionError;
use crate::record::RawRecord;
use crate::value::FieldValue;

pub const JPEG_QUALITY: u8 = 80;
pub const IMAGE_FOLDER: &str = "TRADEMARK_IMAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImageFormat {
    Tiff,
    Jpeg,
}

impl ImageFormat {
    /// Format tag as stored in `IMAGE_TYPE` and `file_type`.
    pub fn tag(self) -> &'static str {
        match self {
            ImageFormat::Tiff => "TIFF",
            ImageFormat::Jpeg => "JPEG",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Tiff => "TIF",
            ImageFormat::Jpeg => "JPG",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "TIFF" | "TIF" => Some(ImageFormat::Tiff),
            "JPEG" | "JPG" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The two archived copies of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImagePass {
    /// Byte-for-byte copy of the source file.
    Original,
    /// Re-encoded at [`JPEG_QUALITY`].
    Jpeg,
}

impl ImagePass {
    pub const ALL: [ImagePass; 2] = [ImagePass::Original, ImagePass::Jpeg];
}

/// What to archive and where it belongs.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub source: PathBuf,
    pub source_format: ImageFormat,
    pub name: String,
    pub root_object_id: Uuid,
    pub attachment_id: Uuid,
    /// Date used for the archive folder layout.
    pub date: NaiveDate,
}

impl ImageRequest {
    /// Archive folder relative to the archive root.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(self.date.format("%Y").to_string())
            .join(self.date.format("%m").to_string())
            .join(self.date.format("%d").to_string())
            .join(self.root_object_id.simple().to_string())
            .join(self.attachment_id.simple().to_string())
            .join(IMAGE_FOLDER)
    }

    pub fn target_format(&self, pass: ImagePass) -> ImageFormat {
        match pass {
            ImagePass::Original => self.source_format,
            ImagePass::Jpeg => ImageFormat::Jpeg,
        }
    }

    pub fn file_name(&self, pass: ImagePass) -> String {
        let sequence = match pass {
            ImagePass::Jpeg if self.source_format == ImageFormat::Jpeg => 2,
            _ => 1,
        };
        format!(
            "{}_{}_{}.{}",
            self.attachment_id.simple(),
            sequence,
            self.name,
            self.target_format(pass).extension()
        )
    }
}

/// One archived image variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestedImage {
    pub file_path: String,
    pub file_name: String,
    pub format: ImageFormat,
    /// Content id, the attachment object id.
    pub content: Uuid,
    pub height: u32,
    pub width: u32,
}

impl IngestedImage {
    /// Expose the ingestion result under the field keys the
    /// representation-file tables read.
    pub fn to_record(&self) -> RawRecord {
        RawRecord::new()
            .with_text("file_path", self.file_path.clone())
            .with_text("file_name", self.file_name.clone())
            .with_text("file_type", self.format.tag())
            .with_value("content", FieldValue::Guid(self.content))
            .with_value("height", FieldValue::Int(i64::from(self.height)))
            .with_value("width", FieldValue::Int(i64::from(self.width)))
    }
}

pub trait ImageIngestor: Send + Sync {
    fn ingest(&self, request: &ImageRequest, pass: ImagePass) -> Result<IngestedImage, ImageIngestionError>;
}

/// Writes archived images under a local staging root and reports their paths
/// under the published root the archive is later served from.
#[derive(Debug, Clone)]
pub struct ArchiveIngestor {
    staging_root: PathBuf,
    published_root: String,
}

impl ArchiveIngestor {
    pub fn new(staging_root: impl Into<PathBuf>, published_root: impl Into<String>) -> Self {
        Self {
            staging_root: staging_root.into(),
            published_root: published_root.into(),
        }
    }

    fn published_path(&self, relative: &Path, file_name: &str) -> String {
        let mut parts = vec![self.published_root.trim_end_matches('/').to_string()];
        parts.extend(relative.iter().map(|c| c.to_string_lossy().into_owned()));
        parts.push(file_name.to_string());
        parts.join("/")
    }
}

impl ImageIngestor for ArchiveIngestor {
    fn ingest(&self, request: &ImageRequest, pass: ImagePass) -> Result<IngestedImage, ImageIngestionError> {
        let relative = request.relative_dir();
        let dir = self.staging_root.join(&relative);
        fs::create_dir_all(&dir)?;

        let file_name = request.file_name(pass);
        let destination = dir.join(&file_name);
        match pass {
            ImagePass::Original => {
                fs::copy(&request.source, &destination)?;
            }
            ImagePass::Jpeg => write_jpeg(&request.source, &destination)?,
        }

        let (width, height) = image::image_dimensions(&destination)?;
        let file_path = self.published_path(&relative, &file_name);
        tracing::info!("Archived image {}", file_path);

        Ok(IngestedImage {
            file_path,
            file_name,
            format: request.target_format(pass),
            content: request.attachment_id,
            height,
            width,
        })
    }
}

fn write_jpeg(source: &Path, destination: &Path) -> Result<(), ImageIngestionError> {
    let rgb = image::open(source)?.to_rgb8();
    let file = fs::File::create(destination)?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ColorType::Rgb8,
    )?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn request(source: PathBuf, format: ImageFormat) -> ImageRequest {
        ImageRequest {
            source,
            source_format: format,
            name: "501".into(),
            root_object_id: Uuid::new_v4(),
            attachment_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2003, 4, 5).unwrap(),
        }
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(ImageFormat::from_tag("tif"), Some(ImageFormat::Tiff));
        assert_eq!(ImageFormat::from_tag("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_tag("PNG"), None);
        assert_eq!(ImageFormat::Tiff.extension(), "TIF");
        assert_eq!(ImageFormat::Jpeg.extension(), "JPG");
    }

    #[test]
    fn test_archive_layout() {
        let req = request(PathBuf::from("x.TIF"), ImageFormat::Tiff);
        let dir = req.relative_dir();
        let parts: Vec<String> = dir.iter().map(|c| c.to_string_lossy().into_owned()).collect();
        assert_eq!(parts[0..3], ["2003", "04", "05"]);
        assert_eq!(parts[3], req.root_object_id.simple().to_string());
        assert_eq!(parts[5], "TRADEMARK_IMAGE");
        assert_eq!(
            req.file_name(ImagePass::Jpeg),
            format!("{}_1_501.JPG", req.attachment_id.simple())
        );
        assert_eq!(
            req.file_name(ImagePass::Original),
            format!("{}_1_501.TIF", req.attachment_id.simple())
        );
    }

    #[test]
    fn test_ingest_original_and_jpeg() {
        let staging = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("501.TIF");
        RgbImage::from_pixel(6, 4, Rgb([200, 10, 10]))
            .save_with_format(&source, image::ImageFormat::Tiff)
            .unwrap();

        let ingestor = ArchiveIngestor::new(staging.path(), "/mnt/archive/");
        let req = request(source, ImageFormat::Tiff);

        let original = ingestor.ingest(&req, ImagePass::Original).unwrap();
        assert_eq!(original.width, 6);
        assert_eq!(original.height, 4);
        assert!(original.file_path.starts_with("/mnt/archive/2003/04/05/"));
        assert!(original.file_name.ends_with(".TIF"));

        let jpeg = ingestor.ingest(&req, ImagePass::Jpeg).unwrap();
        assert_eq!(jpeg.format, ImageFormat::Jpeg);
        assert_eq!(jpeg.content, req.attachment_id);
        assert!(staging
            .path()
            .join(req.relative_dir())
            .join(&jpeg.file_name)
            .exists());

        let record = jpeg.to_record();
        assert_eq!(record.text("file_type"), Some("JPEG"));
        assert_eq!(record.get("width"), Some(&FieldValue::Int(6)));
    }

    #[test]
    fn test_missing_source_fails() {
        let staging = tempfile::tempdir().unwrap();
        let ingestor = ArchiveIngestor::new(staging.path(), "/pub");
        let req = request(PathBuf::from("/nonexistent/501.TIF"), ImageFormat::Tiff);
        assert!(matches!(
            ingestor.ingest(&req, ImagePass::Original),
            Err(ImageIngestionError::Io(_))
        ));
    }

    #[test]
    fn test_jpeg_source_keeps_both_copies() {
        let staging = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("501.JPG");
        RgbImage::from_pixel(8, 3, Rgb([0, 90, 180]))
            .save_with_format(&source, image::ImageFormat::Jpeg)
            .unwrap();

        let ingestor = ArchiveIngestor::new(staging.path(), "/pub");
        let req = request(source.clone(), ImageFormat::Jpeg);
        let original = ingestor.ingest(&req, ImagePass::Original).unwrap();
        let encoded = ingestor.ingest(&req, ImagePass::Jpeg).unwrap();

        assert_ne!(original.file_name, encoded.file_name);
        assert_ne!(original.file_path, encoded.file_path);
        assert_eq!(encoded.format, ImageFormat::Jpeg);
        assert_eq!((encoded.width, encoded.height), (8, 3));

        let dir = staging.path().join(req.relative_dir());
        let copied = fs::read(dir.join(&original.file_name)).unwrap();
        assert_eq!(copied, fs::read(&source).unwrap());
        assert!(dir.join(&encoded.file_name).exists());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 2);
    }
}
