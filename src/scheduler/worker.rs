use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use super::{JobHandler, JobQueue, QueuedJob};
use crate::config::SchedulerConfig;

/// Pool that drains the scheduler queue
///
/// Concurrency is bounded by a semaphore sized from `scheduler.workers`. A failed job is put
/// back on the queue after a linear backoff until `scheduler.max_attempts` is reached; the
/// permit is released before the backoff so a full queue never stalls the pool.
/// Business-rule rejections are final on the first attempt.
pub struct JobWorker {
    handler: Arc<dyn JobHandler>,
    config: SchedulerConfig,
    semaphore: Arc<Semaphore>,
    stats: Arc<WorkerStats>,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl JobWorker {
    pub fn new(handler: Arc<dyn JobHandler>, config: SchedulerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            handler,
            config,
            semaphore,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Consume the queue until it closes or `shutdown` flips to true
    pub async fn run(self, mut queue: JobQueue, mut shutdown: watch::Receiver<bool>) {
        let requeue = queue.requeue_sender();
        info!(workers = self.config.workers, "Job worker started");

        loop {
            let queued = tokio::select! {
                queued = queue.recv() => match queued {
                    Some(queued) => queued,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };

            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let handler = Arc::clone(&self.handler);
            let config = self.config.clone();
            let stats = Arc::clone(&self.stats);
            let requeue = requeue.clone();

            tokio::spawn(async move {
                let retry = execute(handler, &config, &stats, queued).await;
                drop(permit);
                if let Some(retry) = retry {
                    redeliver(requeue, config.backoff_for(retry.attempt - 1), retry).await;
                }
            });
        }

        // Wait for in-flight jobs before returning
        let _ = self
            .semaphore
            .acquire_many(self.config.workers.max(1) as u32)
            .await;
        info!("Job worker stopped");
    }
}

/// Run one delivery; returns the next attempt when the job should be retried
async fn execute(
    handler: Arc<dyn JobHandler>,
    config: &SchedulerConfig,
    stats: &WorkerStats,
    queued: QueuedJob,
) -> Option<QueuedJob> {
    let QueuedJob {
        handle,
        job,
        attempt,
    } = queued;
    debug!(job = %job, handle = %handle, attempt = attempt, "Running job");

    let err = match handler.handle(job).await {
        Ok(()) => {
            stats.succeeded.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Err(err) => err,
    };

    if err.is_business_rule_violation() || attempt >= config.max_attempts {
        stats.failed.fetch_add(1, Ordering::Relaxed);
        error!(
            job = %job,
            handle = %handle,
            attempt = attempt,
            error = %err,
            error_code = err.code(),
            "Job failed"
        );
        return None;
    }

    stats.retried.fetch_add(1, Ordering::Relaxed);
    warn!(
        job = %job,
        attempt = attempt,
        backoff_ms = config.backoff_for(attempt).as_millis() as u64,
        error = %err,
        "Job failed, retrying"
    );
    Some(QueuedJob {
        handle,
        job,
        attempt: attempt + 1,
    })
}

/// Put a failed job back on the queue after `backoff`
async fn redeliver(requeue: mpsc::Sender<QueuedJob>, backoff: Duration, retry: QueuedJob) {
    tokio::time::sleep(backoff).await;
    let job = retry.job;
    if requeue.send(retry).await.is_err() {
        error!(job = %job, "Job queue closed, dropping retry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MarketplaceError, MarketplaceResult};
    use crate::scheduler::{ScheduledJob, Scheduler, TokioScheduler};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Fails the first `failures` deliveries
    struct FlakyHandler {
        failures: Mutex<u32>,
        calls: Mutex<Vec<ScheduledJob>>,
        error: MarketplaceError,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, job: ScheduledJob) -> MarketplaceResult<()> {
            self.calls.lock().push(job);
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(self.error.clone());
            }
            Ok(())
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            workers: 2,
            max_attempts: 3,
            retry_backoff_ms: 1,
            queue_capacity: 16,
        }
    }

    async fn run_until_idle(handler: Arc<FlakyHandler>, expected_calls: usize) -> Arc<WorkerStats> {
        let (scheduler, queue) = TokioScheduler::new(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = JobWorker::new(handler.clone(), config());
        let stats = worker.stats();
        let task = tokio::spawn(worker.run(queue, shutdown_rx));

        scheduler
            .schedule(Duration::ZERO, ScheduledJob::SweepInactiveTacks)
            .unwrap();

        for _ in 0..200 {
            if handler.calls.lock().len() >= expected_calls {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        stats
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let handler = Arc::new(FlakyHandler {
            failures: Mutex::new(2),
            calls: Mutex::new(Vec::new()),
            error: MarketplaceError::Database("connection reset".to_string()),
        });

        let stats = run_until_idle(handler.clone(), 3).await;
        assert_eq!(handler.calls.lock().len(), 3);
        assert_eq!(stats.retried(), 2);
        assert_eq!(stats.succeeded(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let handler = Arc::new(FlakyHandler {
            failures: Mutex::new(10),
            calls: Mutex::new(Vec::new()),
            error: MarketplaceError::Database("down".to_string()),
        });

        let stats = run_until_idle(handler.clone(), 3).await;
        assert_eq!(handler.calls.lock().len(), 3);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.succeeded(), 0);
    }

    #[tokio::test]
    async fn test_business_rule_violation_not_retried() {
        let handler = Arc::new(FlakyHandler {
            failures: Mutex::new(1),
            calls: Mutex::new(Vec::new()),
            error: MarketplaceError::InvalidTransition {
                entity: crate::models::EntityRef::Tack(crate::models::TackId::new()),
                from: "finished".to_string(),
                event: "start".to_string(),
            },
        });

        let stats = run_until_idle(handler.clone(), 1).await;
        assert_eq!(handler.calls.lock().len(), 1);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.retried(), 0);
    }

    #[tokio::test]
    async fn test_failing_jobs_on_full_queue_keep_draining() {
        let handler = Arc::new(FlakyHandler {
            failures: Mutex::new(u32::MAX),
            calls: Mutex::new(Vec::new()),
            error: MarketplaceError::Database("store unavailable".to_string()),
        });
        let config = SchedulerConfig {
            workers: 1,
            max_attempts: 3,
            retry_backoff_ms: 1,
            queue_capacity: 1,
        };
        let (scheduler, queue) = TokioScheduler::new(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = JobWorker::new(handler.clone(), config);
        let stats = worker.stats();
        let task = tokio::spawn(worker.run(queue, shutdown_rx));

        for _ in 0..3 {
            scheduler
                .schedule(Duration::ZERO, ScheduledJob::SweepOverdueOffers)
                .unwrap();
        }
        for _ in 0..400 {
            if stats.failed() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handler.calls.lock().len(), 9);
        assert_eq!(stats.failed(), 3);
        assert_eq!(stats.retried(), 6);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("worker should stop once signalled")
            .unwrap();
    }
}
