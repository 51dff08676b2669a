//! Queue consumers.
//!
//! Two Redis lists feed the worker: live webhook batches and backfill jobs.
//! Each list has one [`QueueConsumer`] that pops payloads and hands them to a
//! [`JobHandler`] with bounded concurrency. A popped payload is parked on
//! `<queue>:processing` until its handler finishes; leftovers from a crashed
//! run are put back on the queue at start-up. Payloads that cannot be decoded
//! or whose handler fails are moved to a dead-letter list, `<queue>:failed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use txvault_core::{EventBatch, FeedJob};

use crate::backfill::Backfill;
use crate::error::WorkerError;
use crate::pipeline::Pipeline;

/// Suffix of the dead-letter list for a queue.
pub const DEAD_LETTER_SUFFIX: &str = ":failed";

/// Suffix of the list holding payloads whose handler has not finished.
pub const PROCESSING_SUFFIX: &str = ":processing";

// ============================================================================
// Sources
// ============================================================================

/// Where job payloads come from.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Queue name, for logs and stats.
    fn name(&self) -> &str;

    /// Put back payloads a previous run took but never finished.
    /// Returns how many were re-queued.
    async fn recover(&self) -> Result<usize, WorkerError>;

    /// Wait up to `timeout` for the next payload. The payload stays
    /// reserved until it is acknowledged or dead-lettered.
    async fn next_job(&self, timeout: Duration) -> Result<Option<String>, WorkerError>;

    /// Release a payload whose handler succeeded.
    async fn ack(&self, payload: &str) -> Result<(), WorkerError>;

    /// Move a payload that could not be processed to the dead-letter list.
    async fn dead_letter(&self, payload: &str) -> Result<(), WorkerError>;
}

/// [`JobSource`] over a Redis list. Producers `LPUSH`; the worker `BLMOVE`s
/// from the right end onto the processing list.
#[derive(Debug, Clone)]
pub struct RedisListSource {
    client: redis::Client,
    queue: String,
    processing_queue: String,
    dead_letter_queue: String,
}

impl RedisListSource {
    /// Create a source for the list named `queue`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(url: &str, queue: impl Into<String>) -> Result<Self, WorkerError> {
        let queue = queue.into();
        Ok(Self {
            client: redis::Client::open(url)?,
            processing_queue: format!("{queue}{PROCESSING_SUFFIX}"),
            dead_letter_queue: format!("{queue}{DEAD_LETTER_SUFFIX}"),
            queue,
        })
    }
}

#[async_trait]
impl JobSource for RedisListSource {
    fn name(&self) -> &str {
        &self.queue
    }

    async fn recover(&self) -> Result<usize, WorkerError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut requeued = 0;
        // Newest first onto the consuming end, so the oldest is popped next.
        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&self.processing_queue)
                .arg(&self.queue)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            requeued += 1;
        }
        Ok(requeued)
    }

    async fn next_job(&self, timeout: Duration) -> Result<Option<String>, WorkerError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let moved: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.queue)
            .arg(&self.processing_queue)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn ack(&self, payload: &str) -> Result<(), WorkerError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.lrem(&self.processing_queue, 1, payload).await?;
        Ok(())
    }

    async fn dead_letter(&self, payload: &str) -> Result<(), WorkerError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .lpush(&self.dead_letter_queue, payload)
            .ignore()
            .lrem(&self.processing_queue, 1, payload)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Processes one decoded payload.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handle a payload. An error sends it to the dead-letter list.
    async fn handle(&self, payload: Value) -> Result<(), WorkerError>;
}

/// Live webhook batches, run through the ingestion pipeline.
pub struct WebhookJobs {
    pipeline: Arc<Pipeline>,
}

impl WebhookJobs {
    /// Create a handler over a pipeline.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobHandler for WebhookJobs {
    async fn handle(&self, payload: Value) -> Result<(), WorkerError> {
        let batch = EventBatch::from_value(payload)?;
        self.pipeline.handle(batch).await;
        Ok(())
    }
}

/// Backfill jobs for a single tenant database.
pub struct BackfillJobs {
    backfill: Arc<Backfill>,
}

impl BackfillJobs {
    /// Create a handler over a backfill runner.
    #[must_use]
    pub fn new(backfill: Arc<Backfill>) -> Self {
        Self { backfill }
    }
}

#[async_trait]
impl JobHandler for BackfillJobs {
    async fn handle(&self, payload: Value) -> Result<(), WorkerError> {
        let job: FeedJob = serde_json::from_value(payload)?;
        self.backfill.run(job).await?;
        Ok(())
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Counters for one queue.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    name: String,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`QueueMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Queue name.
    pub name: String,
    /// Payloads handled successfully.
    pub processed: u64,
    /// Payloads sent to the dead-letter list.
    pub failed: u64,
}

impl QueueMetrics {
    /// Create zeroed counters for a queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Read the counters.
    #[must_use]
    pub fn snapshot(&self) -> QueueStats {
        QueueStats {
            name: self.name.clone(),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Pops payloads from a [`JobSource`] and runs a [`JobHandler`] on each.
pub struct QueueConsumer {
    source: Arc<dyn JobSource>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_timeout: Duration,
    metrics: Arc<QueueMetrics>,
}

impl QueueConsumer {
    /// Create a consumer running at most `concurrency` jobs at once.
    #[must_use]
    pub fn new(
        source: Arc<dyn JobSource>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_timeout: Duration,
    ) -> Self {
        let metrics = Arc::new(QueueMetrics::new(source.name()));
        Self {
            source,
            handler,
            concurrency: concurrency.max(1),
            poll_timeout,
            metrics,
        }
    }

    /// Counters shared with the stats endpoint.
    #[must_use]
    pub fn metrics(&self) -> Arc<QueueMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Consume until `shutdown` flips to true, then wait for in-flight jobs.
    ///
    /// A poll in progress is never abandoned; shutdown is noticed once it
    /// returns, so at worst after one poll timeout.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let queue = self.source.name().to_string();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        match self.source.recover().await {
            Ok(0) => {}
            Ok(requeued) => info!(queue = %queue, requeued, "re-queued unfinished jobs"),
            Err(e) => warn!(queue = %queue, error = %e, "failed to re-queue unfinished jobs"),
        }
        info!(queue = %queue, concurrency = self.concurrency, "queue consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = self.source.next_job(self.poll_timeout).await;

            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    error!(queue = %queue, error = %e, "job task aborted");
                }
            }

            match next {
                Ok(Some(payload)) => {
                    let source = Arc::clone(&self.source);
                    let handler = Arc::clone(&self.handler);
                    let metrics = Arc::clone(&self.metrics);
                    tasks.spawn(async move {
                        process(source.as_ref(), handler.as_ref(), &metrics, payload).await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(queue = %queue, error = %e, "queue poll failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        () = tokio::time::sleep(self.poll_timeout) => {}
                    }
                }
            }
        }

        info!(queue = %queue, in_flight = tasks.len(), "queue consumer draining");
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!(queue = %queue, error = %e, "job task aborted");
            }
        }
        info!(queue = %queue, "queue consumer stopped");
    }
}

async fn process(
    source: &dyn JobSource,
    handler: &dyn JobHandler,
    metrics: &QueueMetrics,
    payload: String,
) {
    let result = match serde_json::from_str::<Value>(&payload) {
        Ok(value) => handler.handle(value).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => {
            metrics.processed.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %source.name(), "job done");
            if let Err(e) = source.ack(&payload).await {
                error!(queue = %source.name(), error = %e, "failed to acknowledge job");
            }
        }
        Err(e) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            error!(queue = %source.name(), error = %e, "job failed");
            if let Err(e) = source.dead_letter(&payload).await {
                error!(queue = %source.name(), error = %e, "failed to dead-letter job");
            }
        }
    }
}
