//! genq-admin - operator CLI for the generation job store.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};

use genq_models::{JobId, JobStatus, JobType, Parameters};
use genq_queue::{JobStore, QueueConfig};

#[derive(Parser)]
#[command(name = "genq-admin")]
#[command(about = "Inspect and maintain the generation job store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Redis URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Prefix of every store key
    #[arg(long, env = "QUEUE_KEY_PREFIX", default_value = "generation_jobs")]
    key_prefix: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a queued job
    Create {
        /// Job type (text_to_image, text_to_video)
        #[arg(short, long)]
        job_type: JobType,

        /// Priority (higher = claimed first)
        #[arg(short, long, default_value = "0")]
        priority: i32,

        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Show one job
    Get {
        /// Job ID
        job_id: String,
    },

    /// List jobs, newest first
    List {
        /// Only jobs in this status
        #[arg(short, long)]
        status: Option<JobStatus>,

        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },

    /// Show job counts and active workers
    Stats,

    /// Cancel a queued or processing job
    Cancel {
        /// Job ID
        job_id: String,
    },

    /// Delete terminal jobs older than the given age
    Cleanup {
        #[arg(long, default_value = "24")]
        max_age_hours: u32,
    },

    /// Requeue processing jobs whose worker stopped responding
    Requeue {
        #[arg(long, default_value = "300")]
        stale_after_secs: u64,

        #[arg(long, default_value = "3")]
        max_attempts: u32,
    },

    /// Remove heartbeats older than the given age
    PruneHeartbeats {
        #[arg(long, default_value = "3600")]
        max_age_secs: u64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_params(raw: &str) -> Result<Parameters> {
    match serde_json::from_str::<Value>(raw).context("--params is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--params must be a JSON object, got {}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    genq_worker::init_tracing();

    let cli = Cli::parse();

    let config = QueueConfig {
        redis_url: cli.redis_url,
        key_prefix: cli.key_prefix,
    };
    let store = JobStore::connect(&config)
        .await
        .context("Failed to connect to job store")?;

    match cli.command {
        Commands::Create {
            job_type,
            priority,
            params,
        } => {
            let job_id = store.create(job_type, parse_params(&params)?, priority).await?;
            print_json(&json!({ "job_id": job_id.as_str(), "status": JobStatus::Queued }))?;
        }

        Commands::Get { job_id } => {
            let job = store
                .get(&JobId::from_string(&job_id))
                .await?
                .with_context(|| format!("Job {} not found", job_id))?;
            print_json(&job)?;
        }

        Commands::List { status, limit } => {
            print_json(&store.list(status, limit).await?)?;
        }

        Commands::Stats => {
            print_json(&store.stats().await?)?;
        }

        Commands::Cancel { job_id } => {
            let cancelled = store.cancel(&JobId::from_string(&job_id)).await?;
            print_json(&json!({ "job_id": job_id, "cancelled": cancelled }))?;
        }

        Commands::Cleanup { max_age_hours } => {
            let deleted = store.cleanup(max_age_hours).await?;
            print_json(&json!({ "deleted": deleted }))?;
        }

        Commands::Requeue {
            stale_after_secs,
            max_attempts,
        } => {
            let report = store
                .requeue_abandoned(Duration::from_secs(stale_after_secs), max_attempts)
                .await?;
            let ids = |ids: &[JobId]| ids.iter().map(|id| id.as_str().to_string()).collect::<Vec<_>>();
            print_json(&json!({
                "requeued": ids(&report.requeued),
                "failed": ids(&report.failed),
            }))?;
        }

        Commands::PruneHeartbeats { max_age_secs } => {
            let pruned = store
                .prune_heartbeats(Duration::from_secs(max_age_secs))
                .await?;
            print_json(&json!({ "pruned": pruned }))?;
        }
    }

    Ok(())
}
