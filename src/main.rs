use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use savings_pipeline::app::normalize_use_case::NormalizeUseCase;
use savings_pipeline::app::ports::EnvelopeOutputPort;
use savings_pipeline::app::resolution_use_case::ResolutionUseCase;
use savings_pipeline::app::run_use_case::RunUseCase;
use savings_pipeline::app::services::PipelineServices;
use savings_pipeline::common::{Clock, SystemClock};
use savings_pipeline::config::PipelineConfig;
use savings_pipeline::domain::RawRecord;
use savings_pipeline::infra::{FileEnvelopeOutputAdapter, StdoutEnvelopeOutputAdapter};
use savings_pipeline::pipeline::processing::normalize::NormalizationRegistry;
use savings_pipeline::pipeline::storage::{
    InMemoryReferenceStore, ReferenceSeed, SqliteReferenceStore,
};
use savings_pipeline::{logging, observability};

#[derive(Parser)]
#[command(name = "savings_pipeline")]
#[command(about = "Normalize scraped savings listings and resolve institution identities")]
#[command(version = "0.1.0")]
struct Cli {
    /// Pipeline config file (defaults to $SAVINGS_PIPELINE_CONFIG or pipeline.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite reference database (in-memory store when omitted)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// TOML reference seed applied to the store before running
    #[arg(long, global = true)]
    reference: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize raw records without resolving identities
    Normalize {
        /// Source tag (see `sources`)
        #[arg(long)]
        source: String,
        /// JSON array of raw records
        #[arg(long)]
        input: PathBuf,
        /// Envelope output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Resolve a single institution name
    Resolve {
        #[arg(long)]
        name: String,
        #[arg(long)]
        source: Option<String>,
    },
    /// Normalize, resolve identities and write the annotated envelope
    Run {
        #[arg(long)]
        source: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print the Prometheus exposition of this run's metrics
        #[arg(long)]
        print_metrics: bool,
    },
    /// List built-in source profiles
    Sources,
}

/// Either reference store, kept concrete so both port sets stay available
enum Store {
    Memory(Arc<InMemoryReferenceStore>),
    Sqlite(Arc<SqliteReferenceStore>),
}

impl Store {
    fn open(config: &PipelineConfig, db: Option<&Path>, seed: Option<&Path>) -> Result<Self> {
        let seed = match seed {
            Some(path) => Some(
                ReferenceSeed::load(path)
                    .with_context(|| format!("Failed to load reference seed {}", path.display()))?,
            ),
            None => None,
        };

        let db_path = db
            .map(|p| p.to_path_buf())
            .or_else(|| config.database_path.as_ref().map(PathBuf::from));

        match db_path {
            Some(path) => {
                info!("Using SQLite reference store at {}", path.display());
                let store = SqliteReferenceStore::open(&path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                if let Some(seed) = &seed {
                    store.apply_seed(seed)?;
                }
                Ok(Store::Sqlite(Arc::new(store)))
            }
            None => {
                if seed.is_none() {
                    warn!("No reference database or seed given; every name will go to review");
                }
                let store = seed
                    .as_ref()
                    .map(InMemoryReferenceStore::from_seed)
                    .unwrap_or_default();
                Ok(Store::Memory(Arc::new(store)))
            }
        }
    }

    fn services(&self, config: &PipelineConfig, clock: Arc<dyn Clock>) -> PipelineServices {
        match self {
            Store::Memory(store) => PipelineServices::new(config, store.clone(), clock),
            Store::Sqlite(store) => PipelineServices::new(config, store.clone(), clock),
        }
    }
}

fn load_input(path: &Path) -> Result<Vec<RawRecord>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records: Vec<RawRecord> = serde_json::from_str(&data)
        .with_context(|| format!("Expected a JSON array of records in {}", path.display()))?;
    Ok(records)
}

fn output_port(output: Option<&Path>) -> Result<Box<dyn EnvelopeOutputPort>> {
    Ok(match output {
        Some(path) => Box::new(FileEnvelopeOutputAdapter::new(path)?),
        None => Box::new(StdoutEnvelopeOutputAdapter),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::from_env()?,
    };
    config.validate()?;

    match cli.command {
        Commands::Sources => {
            let registry = NormalizationRegistry::new().with_overrides(&config.sources);
            println!("📚 Built-in source profiles:");
            for tag in registry.list_sources() {
                if let Some(profile) = registry.get_profile(tag) {
                    println!(
                        "   {:<22} {:<18} title_overrides_section={}",
                        tag,
                        profile.extraction_method,
                        profile.category_policy.title_overrides_section
                    );
                }
            }
        }
        Commands::Normalize {
            source,
            input,
            output,
        } => {
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let store = Store::open(&config, cli.db.as_deref(), cli.reference.as_deref())?;
            let services = store.services(&config, clock.clone());
            let raw = load_input(&input)?;

            let use_case =
                NormalizeUseCase::new(services.normalizer.clone(), output_port(output.as_deref())?, clock);
            let envelope = use_case.normalize_batch(&raw, &source).await?;
            eprintln!(
                "✅ Normalized {} records from {}",
                envelope.record_count, envelope.source
            );
        }
        Commands::Resolve { name, source } => {
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let store = Store::open(&config, cli.db.as_deref(), cli.reference.as_deref())?;
            let services = store.services(&config, clock);
            let use_case = ResolutionUseCase::new(services.resolver.clone());

            match use_case.resolve_name(&name, source.as_deref()).await {
                Some(found) => println!(
                    "{} -> {} ({}) via {} match, confidence {:.3}",
                    name,
                    found.canonical_name,
                    found.regulator_id,
                    found.match_method.as_str(),
                    found.confidence
                ),
                None => println!("{} -> no match (queued for review)", name),
            }
        }
        Commands::Run {
            source,
            input,
            output,
            print_metrics,
        } => {
            if let Err(e) = observability::init() {
                warn!("Metrics recorder unavailable: {}", e);
            }

            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let store = Store::open(&config, cli.db.as_deref(), cli.reference.as_deref())?;
            let services = store.services(&config, clock.clone());
            let raw = load_input(&input)?;

            let use_case = RunUseCase::new(
                services.normalizer.clone(),
                services.resolver.clone(),
                output_port(output.as_deref())?,
                clock,
            );
            let envelope = use_case.run(&raw, &source).await?;

            let resolved = envelope.records.iter().filter(|r| r.is_resolved()).count();
            eprintln!("\n📊 Run results for {}:", envelope.source);
            eprintln!("   Records: {}", envelope.record_count);
            eprintln!("   Resolved: {}", resolved);
            if let Some(stats) = &envelope.resolution {
                eprintln!(
                    "   Exact/partial/fuzzy: {}/{}/{}",
                    stats.exact_hits, stats.partial_hits, stats.fuzzy_hits
                );
                eprintln!("   Queued for review: {}", stats.auto_flagged);
                eprintln!("   Lookup failures: {}", stats.failures);
            }

            if let Store::Sqlite(store) = &store {
                let pending = store.pending_reviews()?;
                eprintln!("   Review queue size: {}", pending.len());
            }

            if print_metrics {
                match observability::render() {
                    Some(text) => println!("{}", text),
                    None => warn!("No metrics recorder installed"),
                }
            }
        }
    }

    Ok(())
}
