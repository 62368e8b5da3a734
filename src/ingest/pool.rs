//! Fixed-size worker pool fed through a bounded queue
//!
//! The queue gives the puller backpressure: with [`QueueFullPolicy::Block`] it
//! waits for a free slot, with [`QueueFullPolicy::Drop`] the event is rejected.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::QueueFullPolicy;
use crate::models::ClickEvent;

/// A parsed click waiting to be processed
#[derive(Debug, Clone)]
pub struct ClickJob {
    pub event: ClickEvent,
    /// Delivery token of the log message the click came from
    pub token: String,
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: ClickJob);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    /// Queue full under [`QueueFullPolicy::Drop`]
    Dropped,
    /// The pool is shutting down
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Jobs that were running when the drain deadline passed
    pub abandoned_in_flight: usize,
    /// Jobs still queued when the drain deadline passed
    pub abandoned_queued: usize,
}

impl DrainReport {
    pub fn abandoned(&self) -> usize {
        self.abandoned_in_flight + self.abandoned_queued
    }
}

pub struct WorkerPool {
    sender: mpsc::Sender<ClickJob>,
    workers: Vec<JoinHandle<()>>,
    policy: QueueFullPolicy,
    queued: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn spawn<H: JobHandler>(
        size: usize,
        queue_capacity: usize,
        policy: QueueFullPolicy,
        handler: Arc<H>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let queued = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let workers = (0..size.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                let queued = Arc::clone(&queued);
                let in_flight = Arc::clone(&in_flight);

                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };

                        in_flight.fetch_add(1, Ordering::SeqCst);
                        queued.fetch_sub(1, Ordering::SeqCst);
                        handler.handle(job).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                    debug!(worker_id, "Ingestion worker exiting");
                })
            })
            .collect();

        Self {
            sender,
            workers,
            policy,
            queued,
            in_flight,
        }
    }

    /// Number of jobs currently being processed
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Hand a job to the workers.
    ///
    /// Cancel safe: a job whose future is dropped while waiting for a slot
    /// is discarded without touching the queue or its counters.
    pub async fn dispatch(&self, job: ClickJob) -> Dispatch {
        let permit = match self.policy {
            QueueFullPolicy::Block => self.sender.reserve().await.map_err(|_| Dispatch::Closed),
            QueueFullPolicy::Drop => self.sender.try_reserve().map_err(|err| match err {
                mpsc::error::TrySendError::Full(()) => Dispatch::Dropped,
                mpsc::error::TrySendError::Closed(()) => Dispatch::Closed,
            }),
        };

        match permit {
            Ok(permit) => {
                // Counted before sending so a worker never observes a negative queue
                self.queued.fetch_add(1, Ordering::SeqCst);
                permit.send(job);
                Dispatch::Queued
            }
            Err(outcome) => outcome,
        }
    }

    /// Close the queue and wait for workers to finish what was dispatched.
    ///
    /// With a `drain_timeout`, workers still busy at the deadline are aborted
    /// and the work they had left is reported as abandoned.
    pub async fn shutdown(self, drain_timeout: Option<Duration>) -> DrainReport {
        let WorkerPool {
            sender,
            mut workers,
            queued,
            in_flight,
            ..
        } = self;
        drop(sender);

        let deadline = drain_timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        let mut report = DrainReport::default();

        for index in 0..workers.len() {
            let handle = &mut workers[index];
            let joined = match deadline {
                None => handle.await.map_err(Some),
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut *handle).await {
                    Ok(result) => result.map_err(Some),
                    Err(_) => Err(None),
                },
            };

            match joined {
                Ok(()) => {}
                Err(Some(err)) => warn!(error = %err, "Ingestion worker terminated abnormally"),
                Err(None) => {
                    report = DrainReport {
                        abandoned_in_flight: in_flight.load(Ordering::SeqCst),
                        abandoned_queued: queued.load(Ordering::SeqCst),
                    };
                    for remaining in &workers[index..] {
                        remaining.abort();
                    }
                    warn!(
                        in_flight = report.abandoned_in_flight,
                        queued = report.abandoned_queued,
                        "Drain timeout reached, abandoning unfinished click events"
                    );
                    break;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::AtomicU64;

    struct SleepyHandler {
        delay: Duration,
        done: AtomicU64,
    }

    #[async_trait]
    impl JobHandler for SleepyHandler {
        async fn handle(&self, _job: ClickJob) {
            tokio::time::sleep(self.delay).await;
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job(n: i64) -> ClickJob {
        ClickJob {
            event: ClickEvent {
                ad_id: "ad1".to_string(),
                timestamp: Utc::now(),
                ip: "1.2.3.4".to_string(),
                playback_seconds: 1,
                user_agent: None,
            },
            token: format!("ad_clicks:0:{n}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_dispatched_jobs() {
        let handler = Arc::new(SleepyHandler {
            delay: Duration::from_millis(50),
            done: AtomicU64::new(0),
        });
        let pool = WorkerPool::spawn(2, 8, QueueFullPolicy::Block, Arc::clone(&handler));

        for n in 0..5 {
            assert_eq!(pool.dispatch(job(n)).await, Dispatch::Queued);
        }

        let report = pool.shutdown(None).await;
        assert_eq!(report, DrainReport::default());
        assert_eq!(handler.done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_drop_policy_rejects_when_full() {
        let handler = Arc::new(SleepyHandler {
            delay: Duration::from_millis(200),
            done: AtomicU64::new(0),
        });
        let pool = WorkerPool::spawn(1, 1, QueueFullPolicy::Drop, Arc::clone(&handler));

        assert_eq!(pool.dispatch(job(0)).await, Dispatch::Queued);
        // Let the single worker pick up the first job
        while pool.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.dispatch(job(1)).await, Dispatch::Queued);
        assert_eq!(pool.dispatch(job(2)).await, Dispatch::Dropped);
        assert_eq!(pool.queued(), 1);

        pool.shutdown(None).await;
        assert_eq!(handler.done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_leaves_queue_untouched() {
        let handler = Arc::new(SleepyHandler {
            delay: Duration::from_secs(30),
            done: AtomicU64::new(0),
        });
        let pool = WorkerPool::spawn(1, 1, QueueFullPolicy::Block, Arc::clone(&handler));

        assert_eq!(pool.dispatch(job(0)).await, Dispatch::Queued);
        while pool.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.dispatch(job(1)).await, Dispatch::Queued);

        // Queue is full, so this dispatch waits until it is cancelled
        let waited = tokio::time::timeout(Duration::from_millis(50), pool.dispatch(job(2))).await;
        assert!(waited.is_err());
        assert_eq!(pool.queued(), 1);

        let report = pool.shutdown(Some(Duration::from_millis(50))).await;
        assert_eq!(report.abandoned_in_flight, 1);
        assert_eq!(report.abandoned_queued, 1);
    }

    #[tokio::test]
    async fn test_drain_timeout_abandons_stuck_jobs() {
        let handler = Arc::new(SleepyHandler {
            delay: Duration::from_secs(30),
            done: AtomicU64::new(0),
        });
        let pool = WorkerPool::spawn(1, 4, QueueFullPolicy::Block, Arc::clone(&handler));

        pool.dispatch(job(0)).await;
        pool.dispatch(job(1)).await;
        while pool.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let started = std::time::Instant::now();
        let report = pool.shutdown(Some(Duration::from_millis(100))).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.abandoned_in_flight, 1);
        assert_eq!(report.abandoned_queued, 1);
        assert_eq!(report.abandoned(), 2);
        assert_eq!(handler.done.load(Ordering::SeqCst), 0);
    }
}
