//! Video timeline pipeline worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vtl_firestore::{AggregateRepository, FirestoreClient, RawIntervalRepository};
use vtl_queue::{ChangeFeed, ContributionQueue, QueueConfig};
use vtl_worker::metrics::init_metrics;
use vtl_worker::{AggregateUpdater, ForwardingRelay, StreamExecutor, WorkerConfig, WorkerRole};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vtl=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vtl-worker");

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    let queue_config = QueueConfig::from_env();
    info!("Worker config: {:?}", config);

    init_metrics(config.metrics_addr)?;
    info!(addr = %config.metrics_addr, "Metrics exporter listening");

    let redis = redis::Client::open(queue_config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let firestore = FirestoreClient::from_env()
        .await
        .context("Failed to create Firestore client")?;

    let mut executors = Vec::new();

    if config.runs(WorkerRole::Relay) {
        let change_feed = ChangeFeed::new(redis.clone(), &queue_config);
        let relay = ForwardingRelay::new(
            Arc::new(RawIntervalRepository::new(firestore.clone())),
            Arc::new(ContributionQueue::new(redis.clone(), &queue_config)),
        );
        executors.push(Arc::new(StreamExecutor::new(
            config.clone(),
            &queue_config,
            vec![change_feed.queue().clone()],
            Arc::new(relay),
        )));
    }

    if config.runs(WorkerRole::Updater) {
        let contributions = ContributionQueue::new(redis.clone(), &queue_config);
        let updater = AggregateUpdater::new(
            Arc::new(AggregateRepository::new(firestore.clone())),
            config.write_mode,
        )
        .with_conflict_retries(config.max_conflict_retries, config.conflict_backoff);
        executors.push(Arc::new(StreamExecutor::new(
            config.clone(),
            &queue_config,
            contributions.shards().to_vec(),
            Arc::new(updater),
        )));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Setup signal handler
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let handles: Vec<_> = executors
        .into_iter()
        .map(|executor| tokio::spawn(executor.run(shutdown_rx.clone())))
        .collect();

    let mut failed = false;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Executor error: {}", e);
                failed = true;
            }
            Err(e) => {
                error!("Executor task failed: {}", e);
                failed = true;
            }
        }
    }

    if failed {
        anyhow::bail!("worker stopped with errors");
    }

    info!("Worker shutdown complete");
    Ok(())
}
