//! Stream executor.
//!
//! Reads batches from one or more streams of a consumer group and hands
//! them to a [`BatchHandler`]. A batch is acknowledged as a whole when the
//! handler succeeds and left pending when it fails; pending batches are
//! reclaimed after an idle period and retried until the delivery limit,
//! after which they go to the dead-letter stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use vtl_queue::{Delivery, QueueConfig, ReadBatch, StreamQueue};

use crate::config::{WorkerConfig, WorkerRole};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::BatchLogger;
use crate::metrics;

/// Backoff after a failed read or claim.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Consumer logic run by the executor.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    fn role(&self) -> WorkerRole;

    /// Process a batch. An error leaves every message of the batch unacknowledged.
    async fn handle_batch(&self, deliveries: &[Delivery]) -> WorkerResult<()>;
}

pub struct StreamExecutor {
    config: WorkerConfig,
    streams: Vec<StreamQueue>,
    handler: Arc<dyn BatchHandler>,
    dlq_stream: String,
    max_deliveries: u64,
    block_timeout: Duration,
    batch_semaphore: Arc<Semaphore>,
    consumer_name: String,
}

impl StreamExecutor {
    pub fn new(
        config: WorkerConfig,
        queue_config: &QueueConfig,
        streams: Vec<StreamQueue>,
        handler: Arc<dyn BatchHandler>,
    ) -> Self {
        let batch_semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches));
        let consumer_name = format!("{}-{}", handler.role(), Uuid::new_v4());

        Self {
            config,
            streams,
            handler,
            dlq_stream: queue_config.dlq_stream.clone(),
            max_deliveries: queue_config.max_deliveries,
            block_timeout: queue_config.block_timeout,
            batch_semaphore,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until `shutdown` turns true, then wait for in-flight batches.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            streams = self.streams.len(),
            max_batches = self.config.max_concurrent_batches,
            batch_size = self.config.batch_size,
            "Starting stream executor"
        );

        for stream in &self.streams {
            stream.init().await?;
        }

        let mut tasks = Vec::with_capacity(self.streams.len() + 1);
        for index in 0..self.streams.len() {
            let executor = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move { executor.consume_loop(index, shutdown).await }));
        }
        let executor = Arc::clone(&self);
        let claim_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { executor.claim_loop(claim_shutdown).await }));

        for task in tasks {
            if let Err(e) = task.await {
                error!(consumer = %self.consumer_name, "Executor task panicked: {}", e);
            }
        }

        info!(consumer = %self.consumer_name, "Waiting for in-flight batches to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_batches())
            .await
            .is_err()
        {
            warn!(
                consumer = %self.consumer_name,
                "Shutdown timeout elapsed with batches in flight; they will be reclaimed"
            );
        }

        info!(consumer = %self.consumer_name, "Stream executor stopped");
        Ok(())
    }

    async fn consume_loop(self: Arc<Self>, index: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = self.consume_once(index) => {
                    if let Err(e) = result {
                        error!(stream = %self.streams[index].stream(), "Error consuming stream: {}", e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        }
        debug!(stream = %self.streams[index].stream(), "Consume loop stopped");
    }

    /// Read one batch once a batch slot is free and process it in the background.
    async fn consume_once(self: &Arc<Self>, index: usize) -> WorkerResult<()> {
        let permit = Arc::clone(&self.batch_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::batch_failed("batch semaphore closed"))?;

        let batch = self.streams[index]
            .read_group(
                &self.consumer_name,
                self.config.batch_size,
                self.block_timeout.as_millis() as u64,
            )
            .await?;

        let deliveries = self.reject(index, batch).await;
        if deliveries.is_empty() {
            return Ok(());
        }

        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            executor.process_batch(index, deliveries).await;
        });
        Ok(())
    }

    async fn claim_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.claim_interval.max(Duration::from_secs(1)));
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    for index in 0..self.streams.len() {
                        if let Err(e) = self.claim_once(index).await {
                            warn!(stream = %self.streams[index].stream(), "Failed to claim stale messages: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Reclaim messages left pending by failed batches or dead consumers.
    async fn claim_once(self: &Arc<Self>, index: usize) -> WorkerResult<()> {
        let batch = self.streams[index]
            .claim_stale(
                &self.consumer_name,
                self.config.claim_min_idle.as_millis() as u64,
                self.config.batch_size,
            )
            .await?;

        let deliveries = self.reject(index, batch).await;
        if deliveries.is_empty() {
            return Ok(());
        }

        info!(
            stream = %self.streams[index].stream(),
            count = deliveries.len(),
            "Reprocessing claimed messages"
        );

        let permit = Arc::clone(&self.batch_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::batch_failed("batch semaphore closed"))?;

        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            executor.process_batch(index, deliveries).await;
        });
        Ok(())
    }

    async fn process_batch(&self, index: usize, deliveries: Vec<Delivery>) {
        let role = self.handler.role();
        let logger = BatchLogger::new(role.as_str());
        let span = logger.create_span();

        async {
            let stream = &self.streams[index];
            let (expired, deliveries) = split_expired(deliveries, self.max_deliveries);

            let reason = format!("exceeded {} deliveries", self.max_deliveries);
            for delivery in &expired {
                self.dead_letter(stream, delivery, &reason).await;
            }
            if deliveries.is_empty() {
                return;
            }

            logger.log_start(deliveries.len(), stream.stream());
            let started = Instant::now();

            match self.handler.handle_batch(&deliveries).await {
                Ok(()) => {
                    let ids: Vec<String> = deliveries.iter().map(|d| d.id.clone()).collect();
                    if let Err(e) = stream.ack(&ids).await {
                        logger.log_warning(&format!("acknowledge failed, batch will be redelivered: {}", e));
                    }
                    metrics::record_batch(role.as_str(), "ok", started.elapsed().as_secs_f64());
                    logger.log_completion(deliveries.len(), started.elapsed().as_millis());
                }
                Err(e) => {
                    metrics::record_batch(role.as_str(), "error", started.elapsed().as_secs_f64());
                    logger.log_error(&e.to_string());

                    // Messages on their last allowed delivery carry the failure to the DLQ.
                    let reason = e.to_string();
                    for delivery in deliveries
                        .iter()
                        .filter(|d| d.delivery_count >= self.max_deliveries)
                    {
                        self.dead_letter(stream, delivery, &reason).await;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Dead-letter the entries the stream could not decode and return the rest.
    async fn reject(&self, index: usize, batch: ReadBatch) -> Vec<Delivery> {
        for rejected in &batch.rejected {
            self.dead_letter(&self.streams[index], &rejected.delivery, &rejected.reason)
                .await;
        }
        batch.deliveries
    }

    async fn dead_letter(&self, stream: &StreamQueue, delivery: &Delivery, reason: &str) {
        match stream.dead_letter(&self.dlq_stream, delivery, reason).await {
            Ok(()) => metrics::record_dead_lettered(self.handler.role().as_str()),
            Err(e) => error!(
                stream = %stream.stream(),
                id = %delivery.id,
                "Failed to dead-letter message: {}", e
            ),
        }
    }

    /// Wait for all in-flight batches to complete.
    async fn wait_for_batches(&self) {
        loop {
            if self.batch_semaphore.available_permits() == self.config.max_concurrent_batches {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Split off deliveries that are already past the delivery limit.
fn split_expired(deliveries: Vec<Delivery>, max_deliveries: u64) -> (Vec<Delivery>, Vec<Delivery>) {
    deliveries
        .into_iter()
        .partition(|d| d.delivery_count > max_deliveries)
}
