//! registry-eav CLI - migrate legacy registry exports into the EAV store.

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use registry_eav::config::MigrationConfig;
use registry_eav::logging::init_tracing;
use registry_eav::{
    dump, ArchiveIngestor, GraphBuilder, MappingSet, MemorySink, MigrationError, MigrationSink,
    Migrator, PipelineSettings, RunReport, SourceReader, Variant,
};

#[derive(Parser)]
#[command(name = "registry-eav")]
#[command(version, about = "Migrate legacy trademark registry exports into an EAV graph store", long_about = None)]
struct Cli {
    /// Path to registry-eav.yaml
    #[arg(short, long, global = true, default_value = "registry-eav.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate the configured serial range into the database
    Run {
        /// Override the source export directory
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Override the worker count
        #[arg(short, long)]
        workers: Option<usize>,

        /// Write the run report as JSON to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Build the graphs without a database and dump the rows as NDJSON
    Plan {
        /// Override the source export directory
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Directory the row files and report.json are written to
        #[arg(short, long, default_value = "plan")]
        output: PathBuf,
    },

    /// Validate the mapping tables and list them
    Mappings {
        /// Print every attribute of every table
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    init_tracing(&config.log_level);

    let result = match cli.command {
        Commands::Run {
            source,
            workers,
            report,
        } => run(config, source, workers, report).await,
        Commands::Plan { source, output } => plan(config, source, output).await,
        Commands::Mappings { verbose } => mappings(&config, verbose),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// A missing default config file means built-in defaults.
fn load_config(path: &Path) -> Result<MigrationConfig, String> {
    if path.is_file() {
        return MigrationConfig::load_from_file(path).map_err(|e| e.to_string());
    }
    let mut config = MigrationConfig::default();
    config.apply_env_overrides();
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn load_mappings(config: &MigrationConfig) -> Result<MappingSet, MigrationError> {
    let set = match &config.mappings_dir {
        Some(dir) => MappingSet::load_with_overrides(dir)?,
        None => MappingSet::builtin()?,
    };
    Ok(set)
}

fn migrator(config: &MigrationConfig, sink: Arc<dyn MigrationSink>) -> Result<Migrator, String> {
    let mappings = load_mappings(config).map_err(|e| e.to_string())?;
    let ingestor = ArchiveIngestor::new(
        config.archive.staging_root.clone(),
        config.archive.published_root.clone(),
    );
    let builder = GraphBuilder::new(
        Arc::new(mappings),
        config.text_policy(),
        Arc::new(ingestor),
        config.build_settings(),
    );
    let settings = PipelineSettings {
        workers: config.workers,
        batch_size: config.batch_size,
        prior: config.prior.query(),
    };
    Ok(Migrator::new(sink, builder, settings))
}

fn reader(config: &MigrationConfig, source: Option<PathBuf>) -> SourceReader {
    let directory = source.unwrap_or_else(|| config.source_dir.clone());
    let reader = SourceReader::new(directory, config.serial_range());
    match &config.image_dir {
        Some(dir) => reader.with_image_directory(dir.clone()),
        None => reader,
    }
}

fn write_report(report: &RunReport, path: &Path) -> Result<(), String> {
    let file = File::create(path)
        .map_err(|e| format!("Failed to create report {}: {}", path.display(), e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .map_err(|e| format!("Failed to write report: {}", e))
}

#[cfg(feature = "postgres")]
fn database_sink(config: &MigrationConfig) -> Result<Arc<dyn MigrationSink>, String> {
    use registry_eav::{Database, DatabaseSink};

    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| "DATABASE_URL is not set and the config has no database_url".to_string())?;
    let db = Database::connect(url, &config.database).map_err(|e| e.to_string())?;
    db.ping().map_err(|e| e.to_string())?;
    println!("  ✓ Connected to database");
    Ok(Arc::new(DatabaseSink::new(db)))
}

#[cfg(not(feature = "postgres"))]
fn database_sink(_config: &MigrationConfig) -> Result<Arc<dyn MigrationSink>, String> {
    Err("built without the `postgres` feature; use `plan` instead".to_string())
}

async fn run(
    mut config: MigrationConfig,
    source: Option<PathBuf>,
    workers: Option<usize>,
    report_path: Option<PathBuf>,
) -> Result<(), String> {
    if let Some(workers) = workers {
        config.workers = workers;
        config.validate().map_err(|e| e.to_string())?;
    }
    let sink = database_sink(&config)?;
    let migrator = migrator(&config, sink)?;
    let reader = reader(&config, source);

    let report = migrator.run(&reader).await.map_err(|e| e.to_string())?;
    report.log_summary();
    if let Some(path) = report_path {
        write_report(&report, &path)?;
        println!("  ✓ Wrote report to {}", path.display());
    }

    if report.failures.is_empty() {
        println!("✨ Migration complete!");
    } else {
        println!("⚠ Migration finished with {} failed records", report.failures.len());
    }
    Ok(())
}

async fn plan(config: MigrationConfig, source: Option<PathBuf>, output: PathBuf) -> Result<(), String> {
    let sink: Arc<dyn MigrationSink> = Arc::new(MemorySink::new());
    let migrator = migrator(&config, sink)?;
    let reader = reader(&config, source);

    let plan = migrator.plan(&reader).await.map_err(|e| e.to_string())?;
    plan.report.log_summary();

    let counts = dump::write_rows(&output, &plan.rows)
        .map_err(|e| format!("Failed to write rows to {}: {}", output.display(), e))?;
    write_report(&plan.report, &output.join("report.json"))?;

    println!("  ✓ {} objects", counts.objects);
    println!("  ✓ {} parentless nodes", counts.parentless_nodes);
    println!("  ✓ {} parented nodes", counts.parented_nodes);
    println!("  ✓ {} attributes", counts.attributes);
    println!("✨ Plan written to {}", output.display());
    Ok(())
}

fn mappings(config: &MigrationConfig, verbose: bool) -> Result<(), String> {
    let set = load_mappings(config).map_err(|e| e.to_string())?;
    println!("  ✓ Mapping tables are valid");

    for variant in Variant::ALL {
        println!("{} ({})", variant, variant.main_table());
        for name in MappingSet::required_tables(variant) {
            println!("  - {}", name);
        }
    }

    println!("Tables:");
    for table in set.tables() {
        println!("  {} ({} attributes)", table.name(), table.len());
        if verbose {
            for (attribute, source) in table.iter() {
                println!("      {}: {:?}", attribute, source);
            }
        }
    }
    println!("Contact tables:");
    for (role, table) in set.contact_tables() {
        println!("  {}.{} ({} attributes)", role.as_str(), table.name(), table.len());
    }
    Ok(())
}
