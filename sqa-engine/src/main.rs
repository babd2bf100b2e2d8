//! sqa-engine — administrative CLI for the bucket progression engine
//!
//! The engine proper is a library driven by the REST layer and the
//! ingestion pipeline; this binary exists for manual re-checks, sweeps,
//! history inspection, and supervisor overrides.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqa_common::db::init::get_setting_i64;
use sqa_common::events::EventBus;
use sqa_engine::types::EvaluationOutcome;
use sqa_engine::{EngineCriteria, EvaluationOrchestrator, QualityBucket};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sqa-engine", about = "Speaker quality bucket engine administration")]
struct Cli {
    /// Data folder holding the SQLite database (overrides env and config)
    #[arg(long)]
    data_dir: Option<String>,

    /// Criteria TOML file (defaults to built-in criteria)
    #[arg(long)]
    criteria: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate one speaker now
    Evaluate {
        speaker_id: Uuid,
        /// Apply an actionable recommendation even if a safeguard would
        /// suppress it
        #[arg(long)]
        force: bool,
    },
    /// Evaluate a batch of speakers
    Sweep {
        /// Cap on the number of speakers to evaluate
        #[arg(long, default_value_t = 100)]
        max_profiles: u32,
        #[arg(long)]
        force: bool,
    },
    /// Show a speaker's bucket change history, newest first
    History {
        speaker_id: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show a speaker's current bucket
    Current { speaker_id: Uuid },
    /// Force a speaker into a bucket (supervisor override)
    Override {
        speaker_id: Uuid,
        /// Target bucket: high_touch, medium_touch, low_touch, no_touch
        bucket: String,
        /// Acting supervisor's user UUID
        #[arg(long)]
        user: Uuid,
    },
    /// List the bucket tier catalog
    Catalog,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting sqa-engine administration tool");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let data_folder = sqa_common::config::resolve_data_folder(cli.data_dir.as_deref());
    let db_path = sqa_common::config::database_path(&data_folder);
    info!("Database: {}", db_path.display());

    let pool = sqa_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let criteria = load_criteria(cli.criteria.as_deref())?;

    let capacity = get_setting_i64(&pool, "event_bus_capacity", 256).await? as usize;
    let event_bus = EventBus::new(capacity);

    let orchestrator = EvaluationOrchestrator::new(pool, event_bus, criteria)
        .await
        .context("Failed to build orchestrator")?;

    match cli.command {
        Command::Evaluate { speaker_id, force } => {
            let outcome = orchestrator.evaluate_now(speaker_id, force).await?;
            print_outcome(speaker_id, &outcome);
        }
        Command::Sweep {
            max_profiles,
            force,
        } => {
            let cancel = CancellationToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Cancellation requested; finishing in-flight speakers");
                    signal_token.cancel();
                }
            });

            let summary = orchestrator
                .batch_evaluate(max_profiles, force, &cancel)
                .await?;

            println!(
                "sweep {}: {} evaluated, {} changed, {} suppressed, {} insufficient, {} failed{}",
                summary.sweep_id,
                summary.evaluated_count,
                summary.changed_count,
                summary.suppressed_count,
                summary.insufficient_count,
                summary.failed_count,
                if summary.cancelled { " (cancelled)" } else { "" },
            );
            for line in &summary.results {
                match &line.detail {
                    Some(detail) => println!("  {}  {}  {}", line.speaker_id, line.outcome, detail),
                    None => println!("  {}  {}", line.speaker_id, line.outcome),
                }
            }
        }
        Command::History { speaker_id, limit } => {
            let records = orchestrator.get_history(speaker_id, limit).await?;
            if records.is_empty() {
                println!("no bucket changes recorded for {}", speaker_id);
            }
            for record in records {
                println!(
                    "{}  {} -> {}  confidence {:.2}  actor {}  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.previous_bucket.as_str(),
                    record.new_bucket.as_str(),
                    record.confidence,
                    record.actor.as_db_string(),
                    record.reason,
                );
            }
        }
        Command::Current { speaker_id } => {
            let bucket = orchestrator.get_current_bucket(speaker_id).await?;
            println!("{}", bucket.as_str());
        }
        Command::Override {
            speaker_id,
            bucket,
            user,
        } => {
            let Some(target) = QualityBucket::parse(&bucket) else {
                bail!(
                    "unknown bucket '{}' (expected high_touch, medium_touch, low_touch, no_touch)",
                    bucket
                );
            };
            let record = orchestrator
                .apply_manual_override(speaker_id, target, user)
                .await?;
            println!(
                "override committed: {} -> {} (record {})",
                record.previous_bucket.as_str(),
                record.new_bucket.as_str(),
                record.id,
            );
        }
        Command::Catalog => {
            for entry in orchestrator.bucket_catalog() {
                println!(
                    "{}  {}  {} - {}",
                    entry.rank,
                    entry.bucket.as_str(),
                    entry.label,
                    entry.description,
                );
            }
        }
    }

    Ok(())
}

fn load_criteria(explicit: Option<&std::path::Path>) -> Result<EngineCriteria> {
    if let Some(path) = explicit {
        return EngineCriteria::load(path)
            .with_context(|| format!("Failed to load criteria from {}", path.display()));
    }

    // Fall back to a criteria file named in the shared TOML config, then
    // to built-in defaults
    if let Ok(config) = sqa_common::config::load_toml_config() {
        if let Some(path) = config.criteria_file {
            return EngineCriteria::load(&path)
                .with_context(|| format!("Failed to load criteria from {}", path.display()));
        }
    }

    Ok(EngineCriteria::default_validated()?)
}

fn print_outcome(speaker_id: Uuid, outcome: &EvaluationOutcome) {
    match outcome {
        EvaluationOutcome::Unchanged { recommendation } => {
            println!(
                "{}: unchanged ({})",
                speaker_id, recommendation.reason
            );
        }
        EvaluationOutcome::Changed { record } => {
            println!(
                "{}: changed {} -> {} (confidence {:.2})",
                speaker_id,
                record.previous_bucket.as_str(),
                record.new_bucket.as_str(),
                record.confidence,
            );
        }
        EvaluationOutcome::Suppressed {
            reason,
            needs_manual_review,
            recommendation,
        } => {
            println!(
                "{}: suppressed [{}]{} (would have applied: {})",
                speaker_id,
                reason.as_code(),
                if *needs_manual_review {
                    " needs manual review"
                } else {
                    ""
                },
                recommendation.reason,
            );
        }
        EvaluationOutcome::InsufficientData { sample_count } => {
            println!(
                "{}: insufficient data ({} reports in window)",
                speaker_id, sample_count
            );
        }
    }
}
