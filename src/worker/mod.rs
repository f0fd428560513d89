//! Background image workers.
//!
//! A [`WorkerPool`] runs `W` long-lived tasks reading from the shared
//! [`WorkQueue`]. Each job is processed by exactly one worker: the uploaded object is
//! read back from the object store, handed to the [`ImageProcessor`] on the
//! blocking pool, and every artifact is written at its derived key.
//!
//! Failures are split into transient ones (retried with capped exponential
//! backoff) and permanent ones (logged and dropped). On shutdown the queue is
//! closed first; workers keep draining until the grace period runs out, after
//! which anything left is logged as dropped.

mod processor;

pub use processor::{ImageProcessor, ProcessError, ThumbnailProcessor};

use crate::queue::{Job, WorkQueue};
use crate::storage::{ObjectLocation, ObjectStore, StorageError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl From<StorageError> for WorkerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) | StorageError::InvalidKey(_) => {
                Self::Permanent(err.to_string())
            }
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<ProcessError> for WorkerError {
    fn from(err: ProcessError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_millis(200),
            cap: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    dropped: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Outcome totals across all workers of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: usize,
    pub failed: usize,
    pub dropped: usize,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    abandon: CancellationToken,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        queue: WorkQueue,
        store: Arc<dyn ObjectStore>,
        processor: Arc<dyn ImageProcessor>,
        retry: RetryPolicy,
    ) -> Self {
        let abandon = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let handles = (0..count.max(1))
            .map(|index| {
                let worker = ImageWorker {
                    index,
                    queue: queue.clone(),
                    store: store.clone(),
                    processor: processor.clone(),
                    retry: retry.clone(),
                    abandon: abandon.clone(),
                    counters: counters.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();

        info!(
            workers = handles.len(),
            max_retries = retry.max_retries,
            backoff_base_ms = retry.base.as_millis(),
            backoff_cap_ms = retry.cap.as_millis(),
            "Image workers started"
        );

        Self {
            handles,
            abandon,
            counters,
        }
    }

    /// Waits for workers to exit. The queue must already be closed, otherwise
    /// they only stop once `grace` has elapsed and remaining jobs are dropped.
    pub async fn shutdown(self, grace: Duration) -> WorkerStats {
        let Self {
            handles,
            abandon,
            counters,
        } = self;

        let mut workers = std::pin::pin!(futures::future::join_all(handles));
        let results = match tokio::time::timeout(grace, workers.as_mut()).await {
            Ok(results) => results,
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis(),
                    "Drain grace period elapsed, abandoning remaining image jobs"
                );
                abandon.cancel();
                workers.await
            }
        };

        for result in results {
            if let Err(e) = result {
                error!(error = %e, "Image worker task failed");
            }
        }

        let stats = counters.snapshot();
        info!(
            processed = stats.processed,
            failed = stats.failed,
            dropped = stats.dropped,
            "Image workers stopped"
        );
        stats
    }
}

struct ImageWorker {
    index: usize,
    queue: WorkQueue,
    store: Arc<dyn ObjectStore>,
    processor: Arc<dyn ImageProcessor>,
    retry: RetryPolicy,
    abandon: CancellationToken,
    counters: Arc<Counters>,
}

impl ImageWorker {
    async fn run(self) {
        info!(worker = self.index, "Image worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = self.abandon.cancelled() => {
                    self.drop_remaining().await;
                    break;
                }
                job = self.queue.receive() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let span = info_span!("image_job", worker = self.index, job_id = %job.id, key = %job.key);
            self.handle(job).instrument(span).await;
        }

        info!(worker = self.index, "Image worker exiting");
    }

    async fn handle(&self, job: Job) {
        let mut retry = 0;
        loop {
            let started = Instant::now();
            match self.process_once(&job).await {
                Ok(artifacts) => {
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                    info!(
                        artifacts = artifacts.len(),
                        retries = retry,
                        duration_ms = started.elapsed().as_millis(),
                        since_submit_ms = job.submitted_at.elapsed().as_millis(),
                        "Image job completed"
                    );
                    return;
                }
                Err(WorkerError::Permanent(reason)) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(%reason, "Dropping image job after permanent failure");
                    return;
                }
                Err(WorkerError::Transient(reason)) if retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    warn!(%reason, retry, delay_ms = delay.as_millis(), "Image job failed, retrying");

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.abandon.cancelled() => {
                            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(location = %job.location, "Shutdown during retry backoff, dropping image job");
                            return;
                        }
                    }
                }
                Err(WorkerError::Transient(reason)) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(%reason, attempts = retry + 1, "Giving up on image job");
                    return;
                }
            }
        }
    }

    async fn process_once(&self, job: &Job) -> Result<Vec<ObjectLocation>, WorkerError> {
        let mut reader = self.store.open(&job.key).await?;
        let mut source = Vec::new();
        reader
            .read_to_end(&mut source)
            .await
            .map_err(|e| WorkerError::Transient(format!("reading {}: {e}", job.key)))?;

        let processor = self.processor.clone();
        let key = job.key.clone();
        let artifacts = tokio::task::spawn_blocking(move || processor.process(&key, &source))
            .await
            .map_err(|e| WorkerError::Permanent(format!("processor task failed: {e}")))??;

        let mut locations = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let key = job.key.derived(&artifact.variant, artifact.extension);
            locations.push(self.store.put_at(&key, artifact.data).await?);
        }
        Ok(locations)
    }

    async fn drop_remaining(&self) {
        for job in self.queue.drain_remaining().await {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                worker = self.index,
                job_id = %job.id,
                key = %job.key,
                "Dropping queued image job at shutdown"
            );
        }
    }
}
