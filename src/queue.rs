//! Bounded in-process handoff between upload handlers and image workers.
//!
//! Handlers call [`WorkQueue::try_submit`], which never waits: a full queue is
//! reported back so the caller can refuse the request. Workers call
//! [`WorkQueue::receive`]. After [`WorkQueue::close`], submissions fail and
//! `receive` keeps returning queued jobs until the buffer is empty.

use crate::storage::{ObjectKey, ObjectLocation};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One stored object waiting for post-processing.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub key: ObjectKey,
    pub location: ObjectLocation,
    pub submitted_at: Instant,
}

impl Job {
    pub fn new(key: ObjectKey, location: ObjectLocation) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            location,
            submitted_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    Full,
    Closed,
}

#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    // Dropping the sender is what closes the channel.
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Job>>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        info!(capacity, "Work queue initialized");
        Self {
            inner: Arc::new(Inner {
                capacity,
                tx: Mutex::new(Some(tx)),
                rx: tokio::sync::Mutex::new(rx),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of jobs currently buffered. Reports 0 once closed.
    pub fn len(&self) -> usize {
        match self.sender() {
            Some(tx) => self.inner.capacity - tx.capacity(),
            None => 0,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        self.inner
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Enqueues without waiting. On failure the job is handed back.
    pub fn try_submit(&self, job: Job) -> Result<(), (SubmitError, Job)> {
        let Some(tx) = self.sender() else {
            return Err((SubmitError::Closed, job));
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                warn!(job_id = %job.id, key = %job.key, "Work queue is full, rejecting job");
                Err((SubmitError::Full, job))
            }
            Err(TrySendError::Closed(job)) => Err((SubmitError::Closed, job)),
        }
    }

    /// Waits for the next job. Returns `None` once the queue is closed and drained.
    pub async fn receive(&self) -> Option<Job> {
        let job = self.inner.rx.lock().await.recv().await;
        if let Some(job) = &job {
            debug!(
                job_id = %job.id,
                key = %job.key,
                waited_ms = job.submitted_at.elapsed().as_millis(),
                "Job dequeued"
            );
        }
        job
    }

    /// Takes everything still buffered without waiting for new jobs.
    pub async fn drain_remaining(&self) -> Vec<Job> {
        let mut rx = self.inner.rx.lock().await;
        let mut jobs = Vec::new();
        while let Ok(job) = rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }

    /// Stops accepting jobs. Idempotent.
    pub fn close(&self) {
        let sender = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if sender.is_some() {
            info!("Work queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(name: &str) -> Job {
        let key = ObjectKey::parse(name).unwrap();
        let location = ObjectLocation::new(format!("uploads/{name}"));
        Job::new(key, location)
    }

    #[tokio::test]
    async fn test_fifo_for_single_producer() {
        let queue = WorkQueue::new(8);
        for name in ["a.png", "b.png", "c.png"] {
            queue.try_submit(job(name)).unwrap();
        }
        assert_eq!(queue.len(), 3);

        let received: Vec<String> = [
            queue.receive().await.unwrap(),
            queue.receive().await.unwrap(),
            queue.receive().await.unwrap(),
        ]
        .into_iter()
        .map(|job| job.key.to_string())
        .collect();

        assert_eq!(received, vec!["a.png", "b.png", "c.png"]);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let queue = WorkQueue::new(2);
        queue.try_submit(job("a.png")).unwrap();
        queue.try_submit(job("b.png")).unwrap();

        let (err, rejected) = queue.try_submit(job("c.png")).unwrap_err();
        assert_eq!(err, SubmitError::Full);
        assert_eq!(rejected.key.as_str(), "c.png");
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = WorkQueue::new(4);
        queue.try_submit(job("a.png")).unwrap();
        queue.try_submit(job("b.png")).unwrap();

        queue.close();
        queue.close();

        let (err, _) = queue.try_submit(job("c.png")).unwrap_err();
        assert_eq!(err, SubmitError::Closed);

        assert_eq!(queue.receive().await.unwrap().key.as_str(), "a.png");
        assert_eq!(queue.receive().await.unwrap().key.as_str(), "b.png");
        assert!(queue.receive().await.is_none());
    }

    #[tokio::test]
    async fn test_receive_waits_for_submission() {
        let queue = WorkQueue::new(4);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.try_submit(job("late.png")).unwrap();
        let received = consumer.await.unwrap().unwrap();
        assert_eq!(received.key.as_str(), "late.png");
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_receiver() {
        let queue = WorkQueue::new(4);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_each_job_goes_to_one_consumer() {
        let queue = WorkQueue::new(64);
        for i in 0..50 {
            queue.try_submit(job(&format!("{i}.png"))).unwrap();
        }
        queue.close();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(job) = queue.receive().await {
                        seen.push(job.id);
                    }
                    seen
                })
            })
            .collect();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 50);
        assert_eq!(all.len(), 50);
    }

    #[tokio::test]
    async fn test_drain_remaining_empties_buffer() {
        let queue = WorkQueue::new(4);
        queue.try_submit(job("a.png")).unwrap();
        queue.try_submit(job("b.png")).unwrap();
        queue.close();

        let drained = queue.drain_remaining().await;
        assert_eq!(drained.len(), 2);
        assert!(queue.receive().await.is_none());
    }
}
