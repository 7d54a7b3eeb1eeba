//! Generation worker binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use genq_provider::{ProviderClient, ProviderConfig, SubmissionMode};
use genq_queue::JobStore;
use genq_worker::{init_tracing, metrics, Dispatcher, WorkerConfig};

/// Claims generation jobs and runs them on the remote provider.
#[derive(Parser, Debug)]
#[command(name = "genq-worker", version, about)]
struct Args {
    /// Worker identity (default: worker-<random>)
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Provider submission mode: async or sync
    #[arg(long, env = "WORKER_SUBMIT_MODE")]
    submit_mode: Option<SubmissionMode>,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    let args = Args::parse();

    let mut config = WorkerConfig::from_env();
    if let Some(worker_id) = args.worker_id.filter(|id| !id.trim().is_empty()) {
        config.worker_id = worker_id;
    }
    if let Some(mode) = args.submit_mode {
        config.submission_mode = mode;
    }

    info!(
        worker_id = %config.worker_id,
        mode = %config.submission_mode,
        "Starting genq-worker"
    );

    if let Some(port) = args.metrics_port {
        metrics::init_metrics(port)?;
        info!("Metrics exporter listening on port {}", port);
    }

    let store = JobStore::from_env()
        .await
        .context("failed to connect to job store")?;

    let provider_config = ProviderConfig::from_env();
    let endpoints = provider_config.clone();
    let client = ProviderClient::new(provider_config).context("invalid provider configuration")?;

    let registry = config.handler_registry()?;

    let dispatcher = Arc::new(Dispatcher::new(
        config,
        Arc::new(store),
        &registry,
        Arc::new(client),
        move |job_type| endpoints.endpoint_for(job_type).to_string(),
    ));

    let signal_target = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_target.shutdown();
        }
    });

    dispatcher.run().await?;

    info!("Worker shutdown complete");
    Ok(())
}
