//! concord - extraction result reconciliation
//!
//! Subcommands:
//! - `reconcile`: run the batch pipeline over file-backed producer results
//! - `serve`: start the HTTP review gate
//! - `correct`: apply a reviewer correction and persist the new version

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use concord_common::config::{
    default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use concord_engine::arbitration::{Arbitrator, HeuristicJudge, HttpJudge, Judge};
use concord_engine::config::EngineConfig;
use concord_engine::db::{self, records};
use concord_engine::producers::{discover_producers, FileProducer, NamedProducer, ParallelProducer};
use concord_engine::review::{apply_correction, Correction};
use concord_engine::taxonomy::Taxonomy;
use concord_engine::types::Segment;
use concord_engine::workflow::{Pipeline, ReconcileEvent, SegmentOutcome};
use concord_engine::AppState;

/// Command-line arguments for concord
#[derive(Parser, Debug)]
#[command(name = "concord")]
#[command(about = "Reconciles extraction results from independent producers")]
#[command(version)]
struct Args {
    /// Config file (defaults to $CONCORD_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(long, global = true, env = "CONCORD_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile a batch of segments
    Reconcile {
        /// JSON array of segments
        #[arg(long)]
        segments: PathBuf,

        /// Taxonomy JSON file
        #[arg(long)]
        taxonomy: PathBuf,

        /// Results directory: <results>/<segment>/<producer>.json
        #[arg(long)]
        results: PathBuf,

        /// Producer ids (default: every producer found under --results)
        #[arg(long, value_delimiter = ',')]
        producers: Vec<String>,

        /// Store assembled records in the database
        #[arg(long)]
        persist: bool,

        /// Write each record to <out>/<segment>.v<version>.json
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Start the HTTP review gate
    Serve {
        /// Taxonomy JSON file corrections are checked against
        #[arg(long)]
        taxonomy: PathBuf,
    },

    /// Apply a correction file and persist the new version
    Correct {
        #[arg(long)]
        segment: String,

        /// Correction JSON file
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        taxonomy: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => TomlConfig::default(),
    };

    concord_common::logging::init_tracing(&toml_config.logging)?;

    info!("Starting concord");
    info!(
        "Version: {} ({} {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("CONCORD_GIT_HASH"),
        env!("CONCORD_BUILD_PROFILE"),
        env!("CONCORD_BUILD_TIMESTAMP")
    );

    let engine_config = EngineConfig::resolve(&toml_config)?;

    let root_folder = RootFolderResolver::new("concord")
        .with_cli_arg(args.root_folder.clone())
        .with_config_path(config_path)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);

    match args.command {
        Command::Reconcile {
            segments,
            taxonomy,
            results,
            producers,
            persist,
            out,
        } => {
            run_reconcile(
                &engine_config,
                &initializer,
                ReconcileArgs {
                    segments,
                    taxonomy,
                    results,
                    producers,
                    persist,
                    out,
                },
            )
            .await
        }
        Command::Serve { taxonomy } => run_serve(&engine_config, &initializer, &taxonomy).await,
        Command::Correct {
            segment,
            file,
            taxonomy,
        } => run_correct(&initializer, &segment, &file, &taxonomy).await,
    }
}

struct ReconcileArgs {
    segments: PathBuf,
    taxonomy: PathBuf,
    results: PathBuf,
    producers: Vec<String>,
    persist: bool,
    out: Option<PathBuf>,
}

async fn run_reconcile(
    config: &EngineConfig,
    initializer: &RootFolderInitializer,
    args: ReconcileArgs,
) -> Result<()> {
    let content = std::fs::read_to_string(&args.segments)
        .with_context(|| format!("Failed to read {}", args.segments.display()))?;
    let segments: Vec<Segment> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", args.segments.display()))?;

    let taxonomy = Taxonomy::load(&args.taxonomy)
        .with_context(|| format!("Failed to load taxonomy {}", args.taxonomy.display()))?;

    let producer_ids = if args.producers.is_empty() {
        discover_producers(&args.results)
            .with_context(|| format!("Failed to scan {}", args.results.display()))?
    } else {
        args.producers.clone()
    };
    if producer_ids.is_empty() {
        warn!("No producers found under {}", args.results.display());
    }
    info!(
        segments = segments.len(),
        producers = ?producer_ids,
        "Reconciling batch"
    );

    let producers = ParallelProducer::new(
        producer_ids
            .iter()
            .map(|id| {
                NamedProducer::new(id.clone(), Arc::new(FileProducer::new(&args.results, id.clone())))
            })
            .collect(),
        config.max_concurrent_producers,
        config.producer_timeout,
    );

    let arbitrator = Arbitrator::new(build_judge(config)?, &config.arbitrator_settings());

    let (event_tx, event_rx) = mpsc::channel(100);
    let event_logger = tokio::spawn(log_events(event_rx));

    let pipeline = Pipeline::new(config.pipeline_config(), producers, arbitrator).with_events(event_tx);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling in-flight segments");
            ctrl_c_token.cancel();
        }
    });

    let outcomes = pipeline.process_batch(&segments, &taxonomy, &cancel).await;
    drop(pipeline);
    let _ = event_logger.await;

    let pool = if args.persist {
        initializer
            .ensure_directory_exists()
            .context("Failed to initialize root folder")?;
        let db_path = initializer.database_path();
        info!("Database: {}", db_path.display());
        Some(db::init_database_pool(&db_path).await?)
    } else {
        None
    };

    if let Some(out) = &args.out {
        std::fs::create_dir_all(out)
            .with_context(|| format!("Failed to create {}", out.display()))?;
    }

    let run_id = Uuid::new_v4();
    let mut failed = 0usize;
    for outcome in &outcomes {
        if outcome.is_failure() {
            failed += 1;
        }

        let stored = match &pool {
            Some(pool) => records::persist_outcome(pool, outcome, &run_id)
                .await
                .with_context(|| format!("Failed to persist segment {}", outcome.segment_id()))?,
            None => outcome.record().cloned(),
        };

        if let (Some(out), Some(record)) = (&args.out, &stored) {
            let path = out.join(format!("{}.v{}.json", record.segment_id, record.version));
            let body = serde_json::to_string_pretty(record)?;
            std::fs::write(&path, body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }

        println!("{}", outcome_summary(outcome, stored.as_ref().map(|r| r.version)));
    }

    if failed > 0 {
        bail!("{} of {} segments failed", failed, outcomes.len());
    }
    Ok(())
}

fn build_judge(config: &EngineConfig) -> Result<Arc<dyn Judge>> {
    match &config.judge_endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, judge = %config.judge_name, "Using HTTP judge");
            let judge = HttpJudge::new(&config.judge_name, endpoint, config.judge_timeout)
                .context("Failed to build HTTP judge")?;
            Ok(Arc::new(judge))
        }
        None => {
            info!("Using built-in heuristic judge");
            Ok(Arc::new(HeuristicJudge::with_name(&config.judge_name)))
        }
    }
}

async fn log_events(mut event_rx: mpsc::Receiver<ReconcileEvent>) {
    while let Some(event) = event_rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => debug!(target: "concord::events", "{}", line),
            Err(e) => warn!("Unserializable event: {}", e),
        }
    }
}

fn outcome_summary(outcome: &SegmentOutcome, stored_version: Option<u32>) -> serde_json::Value {
    match outcome {
        SegmentOutcome::Reconciled(record) | SegmentOutcome::NeedsReview(record) => json!({
            "segment_id": record.segment_id,
            "status": outcome.status(),
            "version": stored_version.unwrap_or(record.version),
            "items": record.items.len(),
            "review_items": record.items.iter().filter(|i| i.needs_review).count(),
            "content_hash": record.content_hash,
        }),
        SegmentOutcome::Failed { segment_id, reason } => json!({
            "segment_id": segment_id,
            "status": outcome.status(),
            "reason": reason,
        }),
        SegmentOutcome::Cancelled { segment_id } => json!({
            "segment_id": segment_id,
            "status": outcome.status(),
        }),
    }
}

async fn run_serve(
    config: &EngineConfig,
    initializer: &RootFolderInitializer,
    taxonomy_path: &Path,
) -> Result<()> {
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let pool = db::init_database_pool(&db_path).await?;
    let taxonomy = Taxonomy::load(taxonomy_path)
        .with_context(|| format!("Failed to load taxonomy {}", taxonomy_path.display()))?;

    let app = concord_engine::build_router(AppState::new(pool, taxonomy));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    info!("Listening on http://{}", config.bind);
    info!("Health check: http://{}/health", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn run_correct(
    initializer: &RootFolderInitializer,
    segment_id: &str,
    file: &Path,
    taxonomy_path: &Path,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let correction: Correction = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    if correction.segment_id != segment_id {
        bail!(
            "Correction names segment {}, but --segment is {}",
            correction.segment_id,
            segment_id
        );
    }

    let taxonomy = Taxonomy::load(taxonomy_path)
        .with_context(|| format!("Failed to load taxonomy {}", taxonomy_path.display()))?;

    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    let pool = db::init_database_pool(&initializer.database_path()).await?;

    let active = records::load_active(&pool, segment_id)
        .await?
        .with_context(|| format!("No record for segment {}", segment_id))?;

    let next = apply_correction(&active, &correction, &taxonomy)?;
    records::append_version(&pool, &next, &Uuid::new_v4()).await?;

    info!(
        segment_id = %segment_id,
        version = next.version,
        status = next.status.as_str(),
        "Correction persisted"
    );
    println!(
        "{}",
        json!({
            "segment_id": next.segment_id,
            "version": next.version,
            "supersedes": next.supersedes,
            "status": next.status.as_str(),
            "content_hash": next.content_hash,
        })
    );
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
