//! Structured summary of one migration run.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;

use crate::classify::Variant;
use crate::error::RecordError;
use crate::graph::TableCounts;
use crate::record::SerialNumber;

/// A record that produced no rows.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub serial: Option<SerialNumber>,
    pub variant: Option<Variant>,
    pub kind: &'static str,
    pub message: String,
}

impl RecordFailure {
    pub fn new(serial: Option<SerialNumber>, variant: Option<Variant>, error: &RecordError) -> Self {
        Self {
            serial,
            variant,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// A non-fatal problem inside a record that was still migrated.
#[derive(Debug, Clone, Serialize)]
pub struct RecordWarning {
    pub serial: SerialNumber,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseTimings {
    pub collect_ms: u128,
    pub build_ms: u128,
    pub load_ms: u128,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        let ms = self.collect_ms + self.build_ms + self.load_ms;
        Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub records_read: usize,
    pub records_migrated: usize,
    pub rewrites: usize,
    pub linked_certificates: usize,
    pub variants: IndexMap<Variant, u64>,
    pub tables: TableCounts,
    pub failures: Vec<RecordFailure>,
    pub warnings: Vec<RecordWarning>,
    pub timings: PhaseTimings,
}

impl RunReport {
    pub fn record_failure(&mut self, failure: RecordFailure) {
        tracing::error!(
            "Record {} failed ({}): {}",
            failure
                .serial
                .map_or_else(|| "<no serial>".to_string(), |s| s.to_string()),
            failure.kind,
            failure.message
        );
        self.failures.push(failure);
    }

    pub fn record_warning(&mut self, serial: SerialNumber, message: impl Into<String>) {
        self.warnings.push(RecordWarning {
            serial,
            message: message.into(),
        });
    }

    /// Log the end-of-run summary.
    pub fn log_summary(&self) {
        tracing::info!(
            "Migrated {} of {} records ({} rewrites, {} failures, {} warnings) in {:.1}s",
            self.records_migrated,
            self.records_read,
            self.rewrites,
            self.failures.len(),
            self.warnings.len(),
            self.timings.total().as_secs_f64()
        );
        for (variant, count) in &self.variants {
            tracing::info!("  {}: {}", variant, count);
        }
        tracing::info!(
            "  rows: {} objects, {} parentless nodes, {} parented nodes, {} attributes",
            self.tables.objects,
            self.tables.parentless_nodes,
            self.tables.parented_nodes,
            self.tables.attributes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassificationError;

    #[test]
    fn test_failure_carries_kind() {
        let error = RecordError::from(ClassificationError::MissingField("NTM"));
        let failure = RecordFailure::new(Some(SerialNumber(9)), None, &error);
        assert_eq!(failure.kind, "classification");
        assert!(failure.message.contains("NTM"));

        let mut report = RunReport::default();
        report.record_failure(failure);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_report_serializes() {
        let mut report = RunReport::default();
        report.variants.insert(Variant::WkTrademark, 3);
        report.record_warning(SerialNumber(1), "image skipped");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["variants"]["wk_trademark"], 3);
        assert_eq!(json["warnings"][0]["serial"], 1);
    }
}
