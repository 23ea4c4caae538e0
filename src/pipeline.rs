//! Migration coordinator.
//!
//! A run goes through three phases:
//!
//! 1. **collect**: read the source exports and classify every record
//! 2. **build**: reconcile and build each record on a bounded pool of blocking
//!    workers. Appellation certificates are built in a second round, after the
//!    first round's graphs are merged, so they can link to primary
//!    appellations migrated in the same run.
//! 3. **load**: bulk-insert the merged buffers in batches, objects first and
//!    attributes last
//!
//! Workers never share row buffers. Each returns its own [`RecordGraph`], and
//! the coordinator merges them in serial-number order after the join.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::classify::{classify, Classification, Variant, VariantCounters};
use crate::error::{MigrationError, RecordError, SinkError};
use crate::graph::{GraphBuilder, RecordGraph, RowBuffers, TableCounts};
use crate::reconcile::{PriorIndex, PriorQuery, Reconciler, RewritePlan};
use crate::record::{RawRecord, SerialNumber};
use crate::report::{RecordFailure, RunReport};
use crate::sink::MigrationSink;
use crate::source::SourceReader;

/// Worker pool and batch sizing.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workers: usize,
    pub batch_size: usize,
    pub prior: PriorQuery,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            batch_size: 2000,
            prior: PriorQuery::default(),
        }
    }
}

/// Built rows of a run that has not been loaded.
#[derive(Debug, Default)]
pub struct MigrationPlan {
    pub rows: RowBuffers,
    pub report: RunReport,
}

/// One classified record waiting for a worker.
struct Job {
    record: RawRecord,
    classification: Classification,
}

/// What a worker hands back.
struct Outcome {
    serial: SerialNumber,
    classification: Classification,
    rewrite: bool,
    result: Result<RecordGraph, RecordError>,
}

pub struct Migrator {
    sink: Arc<dyn MigrationSink>,
    builder: Arc<GraphBuilder>,
    settings: PipelineSettings,
}

impl Migrator {
    pub fn new(sink: Arc<dyn MigrationSink>, builder: GraphBuilder, settings: PipelineSettings) -> Self {
        Self {
            sink,
            builder: Arc::new(builder),
            settings,
        }
    }

    /// Read, build and load everything `reader` yields.
    pub async fn run(&self, reader: &SourceReader) -> Result<RunReport, MigrationError> {
        let MigrationPlan { rows, mut report } = self.plan(reader).await?;

        let started = Instant::now();
        report.tables = self.load(rows).await?;
        report.timings.load_ms = started.elapsed().as_millis();
        tracing::info!("Load phase finished in {:.2?}", started.elapsed());

        Ok(report)
    }

    /// Read and build without loading. Reconciliation still retires prior
    /// subtrees at the sink.
    pub async fn plan(&self, reader: &SourceReader) -> Result<MigrationPlan, MigrationError> {
        let started = Instant::now();
        let reader = reader.clone();
        let records = tokio::task::spawn_blocking(move || reader.read())
            .await
            .map_err(|e| MigrationError::Worker(e.to_string()))??;
        let collect_ms = started.elapsed().as_millis();
        tracing::info!("Collect phase: {} records in {:.2?}", records.len(), started.elapsed());

        let mut plan = self.plan_records(records).await?;
        plan.report.timings.collect_ms = collect_ms;
        Ok(plan)
    }

    /// Classify and build already collected records.
    pub async fn plan_records(&self, records: Vec<RawRecord>) -> Result<MigrationPlan, MigrationError> {
        let started = Instant::now();
        let mut plan = MigrationPlan::default();
        plan.report.records_read = records.len();

        let index = PriorIndex::load(self.sink.as_ref(), &self.settings.prior)?;
        let reconciler = Arc::new(Reconciler::new(index, self.sink.clone()));

        let counters = VariantCounters::new();
        let mut primary_jobs = Vec::new();
        let mut certificate_jobs = Vec::new();
        for mut record in records {
            let serial = record.serial().ok();
            match classify(&mut record) {
                Ok(classification) => {
                    counters.record(classification.variant);
                    let job = Job {
                        record,
                        classification,
                    };
                    if job.classification.variant == Variant::RuAppellationCertificate {
                        certificate_jobs.push(job);
                    } else {
                        primary_jobs.push(job);
                    }
                }
                Err(e) => {
                    let error = RecordError::from(e);
                    plan.report.record_failure(RecordFailure::new(serial, None, &error));
                }
            }
        }
        plan.report.variants = counters.snapshot();

        let outcomes = self.build_round(primary_jobs, &reconciler, &mut plan.report).await?;
        self.merge(outcomes, &reconciler, &mut plan);
        if !certificate_jobs.is_empty() {
            tracing::info!("Building {} appellation certificates", certificate_jobs.len());
            let outcomes = self
                .build_round(certificate_jobs, &reconciler, &mut plan.report)
                .await?;
            self.merge(outcomes, &reconciler, &mut plan);
        }

        plan.report.tables = plan.rows.counts();
        plan.report.timings.build_ms = started.elapsed().as_millis();
        tracing::info!(
            "Build phase: {} records migrated, {} failed in {:.2?}",
            plan.report.records_migrated,
            plan.report.failures.len(),
            started.elapsed()
        );
        Ok(plan)
    }

    async fn build_round(
        &self,
        jobs: Vec<Job>,
        reconciler: &Arc<Reconciler>,
        report: &mut RunReport,
    ) -> Result<Vec<Outcome>, MigrationError> {
        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();

        for job in jobs {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| MigrationError::Worker(e.to_string()))?;
            let builder = self.builder.clone();
            let reconciler = reconciler.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                process(&builder, &reconciler, job)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                // the serial is lost with the task
                Err(e) => report.record_failure(RecordFailure::new(
                    None,
                    None,
                    &RecordError::Worker(e.to_string()),
                )),
            }
        }
        outcomes.sort_by_key(|o| o.serial);
        Ok(outcomes)
    }

    fn merge(&self, outcomes: Vec<Outcome>, reconciler: &Reconciler, plan: &mut MigrationPlan) {
        for outcome in outcomes {
            let variant = outcome.classification.variant;
            match outcome.result {
                Ok(graph) => {
                    if variant == Variant::RuAppellation {
                        reconciler.register_appellation(&outcome.classification.reg_number, graph.main_node_id);
                    }
                    if outcome.rewrite {
                        plan.report.rewrites += 1;
                    }
                    if graph.linked {
                        plan.report.linked_certificates += 1;
                    }
                    for warning in graph.warnings {
                        plan.report.record_warning(graph.serial, warning);
                    }
                    plan.rows.append(graph.rows);
                    plan.report.records_migrated += 1;
                }
                Err(e) => {
                    plan.report
                        .record_failure(RecordFailure::new(Some(outcome.serial), Some(variant), &e));
                }
            }
        }
    }

    /// Bulk-load merged buffers in load order.
    pub async fn load(&self, rows: RowBuffers) -> Result<TableCounts, MigrationError> {
        let sink = self.sink.clone();
        let batch_size = self.settings.batch_size.max(1);
        tokio::task::spawn_blocking(move || load_rows(sink.as_ref(), &rows, batch_size))
            .await
            .map_err(|e| MigrationError::Worker(e.to_string()))?
            .map_err(MigrationError::from)
    }
}

/// Reconcile then build one record. Runs on a blocking worker.
fn process(builder: &GraphBuilder, reconciler: &Reconciler, job: Job) -> Outcome {
    let Job {
        record,
        classification,
    } = job;
    let serial = classification.serial;

    let mut degraded = None;
    let plan = match reconciler.reconcile(serial) {
        Ok(plan) => plan,
        Err(e) => {
            degraded = Some(format!(
                "Record {}: reconciliation failed, migrating as new: {}",
                serial, e
            ));
            RewritePlan::fresh()
        }
    };

    let primary = classification
        .primary_appellation_number()
        .and_then(|number| reconciler.find_primary_appellation(&number));
    let result = builder
        .build(record, &classification, &plan, primary)
        .map(|mut graph| {
            if let Some(message) = degraded {
                graph.warn(message);
            }
            graph
        });

    Outcome {
        serial,
        classification,
        rewrite: plan.rewrite,
        result,
    }
}

fn load_rows(sink: &dyn MigrationSink, rows: &RowBuffers, batch_size: usize) -> Result<TableCounts, SinkError> {
    Ok(TableCounts {
        objects: load_table("objects", &rows.objects, batch_size, |c| sink.insert_objects(c))?,
        parentless_nodes: load_table("parentless nodes", &rows.parentless_nodes, batch_size, |c| {
            sink.insert_parentless_nodes(c)
        })?,
        parented_nodes: load_table("parented nodes", &rows.parented_nodes, batch_size, |c| {
            sink.insert_parented_nodes(c)
        })?,
        attributes: load_table("attributes", &rows.attributes, batch_size, |c| sink.insert_attributes(c))?,
    })
}

fn load_table<T>(
    label: &str,
    rows: &[T],
    batch_size: usize,
    mut insert: impl FnMut(&[T]) -> Result<usize, SinkError>,
) -> Result<usize, SinkError> {
    let started = Instant::now();
    let mut inserted = 0;
    for chunk in rows.chunks(batch_size) {
        inserted += insert(chunk)?;
    }
    tracing::info!("Loaded {} {} in {:.2?}", inserted, label, started.elapsed());
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{ImageIngestor, ImagePass, ImageRequest, IngestedImage};
    use crate::error::ImageIngestionError;
    use crate::graph::BuildSettings;
    use crate::mapping::MappingSet;
    use crate::sink::MemorySink;
    use crate::value::{FieldValue, TextPolicy};
    use uuid::Uuid;

    struct NoImages;

    impl ImageIngestor for NoImages {
        fn ingest(&self, _: &ImageRequest, _: ImagePass) -> Result<IngestedImage, ImageIngestionError> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no images").into())
        }
    }

    fn migrator(sink: Arc<MemorySink>, batch_size: usize) -> Migrator {
        let builder = GraphBuilder::new(
            Arc::new(MappingSet::builtin().unwrap()),
            TextPolicy::default(),
            Arc::new(NoImages),
            BuildSettings::default(),
        );
        let settings = PipelineSettings {
            workers: 2,
            batch_size,
            ..PipelineSettings::default()
        };
        Migrator::new(sink, builder, settings)
    }

    fn main_node_of(rows: &RowBuffers, root: Uuid, table: &str) -> Option<Uuid> {
        rows.nodes_named(table).find(|n| n.parent_number == root).map(|n| n.id)
    }

    fn record(serial: i64, ntm: &str) -> RawRecord {
        RawRecord::new()
            .with_value("NSER", FieldValue::Int(serial))
            .with_text("NTM", ntm)
    }

    #[tokio::test]
    async fn test_failed_classification_is_reported_not_fatal() {
        let sink = Arc::new(MemorySink::new());
        let plan = migrator(sink, 10)
            .plan_records(vec![
                record(1, "1234500"),
                RawRecord::new().with_value("NSER", FieldValue::Int(2)),
            ])
            .await
            .unwrap();
        assert_eq!(plan.report.records_read, 2);
        assert_eq!(plan.report.records_migrated, 1);
        assert_eq!(plan.report.failures.len(), 1);
        assert_eq!(plan.report.failures[0].serial, Some(SerialNumber(2)));
        assert_eq!(plan.report.failures[0].kind, "classification");
        assert_eq!(plan.rows.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_rows_merge_in_serial_order() {
        let sink = Arc::new(MemorySink::new());
        let records = (1..=6).rev().map(|n| record(n, &format!("{}00000", n))).collect();
        let plan = migrator(sink, 10).plan_records(records).await.unwrap();

        let roots: Vec<Uuid> = plan.rows.objects.iter().map(|o| o.number).collect();
        assert_eq!(roots.len(), 6);
        let retro: Vec<i64> = plan
            .rows
            .attributes
            .iter()
            .filter(|a| a.name == "retro_number")
            .filter_map(|a| a.int_value)
            .collect();
        assert_eq!(retro, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_load_batches_all_rows() {
        let sink = Arc::new(MemorySink::new());
        let migrator = migrator(sink.clone(), 3);
        let plan = migrator
            .plan_records(vec![record(1, "1234500"), record(2, "2234500")])
            .await
            .unwrap();
        let expected = plan.rows.counts();
        let loaded = migrator.load(plan.rows).await.unwrap();
        assert_eq!(loaded, expected);
        assert_eq!(sink.counts(), expected);
    }

    #[tokio::test]
    async fn test_certificate_links_within_run() {
        let sink = Arc::new(MemorySink::new());
        let appellation = record(10, "55500").with_text("WCD", "N");
        let certificate = record(11, "55501").with_text("WCD", "N");
        let plan = migrator(sink, 10)
            .plan_records(vec![certificate, appellation])
            .await
            .unwrap();

        assert_eq!(plan.report.linked_certificates, 1);
        let primary = main_node_of(&plan.rows, plan.rows.objects[0].number, "RUAppellation").unwrap();
        assert_eq!(plan.rows.nodes_named("RUAppellationCertificate").count(), 0);
        let retro_on_primary = plan
            .rows
            .attributes_of(primary)
            .filter(|a| a.name == "retro_number")
            .count();
        assert_eq!(retro_on_primary, 2);
    }
}
