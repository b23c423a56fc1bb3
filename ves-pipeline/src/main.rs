use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use ves_core::domain::RawEventInput;
use ves_core::storage::{MemoryStorage, Storage};
use ves_pipeline::cache::{DayBucketEngine, EventCache};
use ves_pipeline::config::PipelineSettings;
use ves_pipeline::observability::logging::init_logging;
use ves_pipeline::pipeline::post_link;
use ves_pipeline::pipeline::{PipelineOptions, PipelineOrchestrator};

#[derive(Parser)]
#[command(name = "ves-pipeline")]
#[command(about = "Event ingestion pipeline and per-category cache for VES")]
#[command(version = "0.1.0")]
struct Cli {
    /// Optional TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a JSON array of raw events through the full pipeline
    Import {
        /// Path to the JSON file with raw event records
        #[arg(long)]
        file: PathBuf,
        /// Source tag recorded for this import
        #[arg(long)]
        source: String,
        /// Default city for records without one
        #[arg(long)]
        city: Option<String>,
        /// Run all logic without persistence or cache writes
        #[arg(long)]
        dry_run: bool,
        /// Events per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Verbose per-batch output
        #[arg(long)]
        debug: bool,
        /// Skip the persisted-duplicate check
        #[arg(long)]
        skip_dedup: bool,
        /// Do not mirror persisted events into the cache
        #[arg(long)]
        no_cache_sync: bool,
    },
    /// Re-attempt venue linkage for events without a venue id
    LinkVenues {
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show recent import runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let settings = PipelineSettings::load(cli.config.as_deref())?;

    // The relational store is an external collaborator; the binary wires the
    // in-memory implementation for demos and dry runs.
    let storage: Arc<MemoryStorage> = Arc::new(MemoryStorage::new());

    match cli.command {
        Commands::Import {
            file,
            source,
            city,
            dry_run,
            batch_size,
            debug,
            skip_dedup,
            no_cache_sync,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading input file {}", file.display()))?;
            let raw_inputs: Vec<RawEventInput> =
                serde_json::from_str(&text).context("parsing raw event records")?;
            info!(count = raw_inputs.len(), file = %file.display(), "loaded raw events");

            let event_cache = EventCache::with_capacity(settings.cache_capacity);
            let sweeper = event_cache.spawn_sweeper(settings.sweep_interval());
            let orchestrator = PipelineOrchestrator::new(
                storage.clone(),
                Arc::new(DayBucketEngine::new()),
                event_cache,
            )
            .with_retry_policy(settings.retry_policy())
            .with_inter_batch_pause(settings.inter_batch_pause());

            let options = PipelineOptions {
                dry_run,
                batch_size: batch_size.unwrap_or(settings.batch_size),
                source,
                city: city.unwrap_or_else(|| settings.default_city.clone()),
                debug,
                skip_deduplication: skip_dedup,
                sync_to_cache: !no_cache_sync,
            };
            let result = orchestrator.run(raw_inputs, &options).await;
            sweeper.abort();

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::LinkVenues { city, dry_run } => {
            let city = city.unwrap_or_else(|| settings.default_city.clone());
            let stats = post_link::link_unvenued_events(
                storage.clone() as Arc<dyn Storage>,
                &city,
                dry_run,
            )
            .await?;
            println!(
                "linked: {}  not found: {}  errors: {}",
                stats.linked, stats.not_found, stats.errors
            );
        }
        Commands::Runs { limit } => {
            let runs = storage.run_history(limit).await?;
            if runs.is_empty() {
                println!("no recorded runs");
            }
            for run in runs {
                println!(
                    "{}  {:<12} {:<8} processed={} inserted={} updated={} failed={} success={}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.source,
                    run.city,
                    run.processed,
                    run.inserted,
                    run.updated,
                    run.failed,
                    run.success
                );
            }
        }
    }

    Ok(())
}
