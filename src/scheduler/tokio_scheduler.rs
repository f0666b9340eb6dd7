use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{JobHandle, ScheduledJob, Scheduler, SchedulerError, SchedulerResult};

/// A job whose delay has elapsed, waiting for a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub handle: JobHandle,
    pub job: ScheduledJob,
    /// 1 for the first delivery
    pub attempt: u32,
}

/// Receiving side of the scheduler queue, consumed by a [`JobWorker`](super::JobWorker)
#[derive(Debug)]
pub struct JobQueue {
    receiver: mpsc::Receiver<QueuedJob>,
    sender: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    pub async fn recv(&mut self) -> Option<QueuedJob> {
        self.receiver.recv().await
    }

    /// Sender used to redeliver failed jobs
    pub fn requeue_sender(&self) -> mpsc::Sender<QueuedJob> {
        self.sender.clone()
    }
}

/// In-process scheduler
///
/// Each scheduled job gets a timer task that sleeps for the delay and then pushes the job onto
/// a bounded mpsc queue. Timer tasks are tracked by handle so pending jobs can be cancelled.
/// Pending timers do not survive a restart; the periodic sweeps recover lost offer expiries.
#[derive(Clone)]
pub struct TokioScheduler {
    sender: mpsc::Sender<QueuedJob>,
    timers: Arc<DashMap<JobHandle, JoinHandle<()>>>,
    shutting_down: Arc<AtomicBool>,
}

impl TokioScheduler {
    pub fn new(queue_capacity: usize) -> (Self, JobQueue) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let scheduler = Self {
            sender: sender.clone(),
            timers: Arc::new(DashMap::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        };
        (scheduler, JobQueue { receiver, sender })
    }

    /// Timers that have not fired yet
    pub fn pending(&self) -> usize {
        self.timers.retain(|_, timer| !timer.is_finished());
        self.timers.len()
    }

    /// Stop accepting jobs and abort all pending timers
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let handles: Vec<JobHandle> = self.timers.iter().map(|entry| *entry.key()).collect();
        for handle in handles {
            if let Some((_, timer)) = self.timers.remove(&handle) {
                timer.abort();
            }
        }
        debug!("Scheduler shut down");
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: ScheduledJob) -> SchedulerResult<JobHandle> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }
        if self.sender.is_closed() {
            return Err(SchedulerError::QueueClosed);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let handle = JobHandle::new();
        let sender = self.sender.clone();
        let timers = Arc::clone(&self.timers);
        let (armed_tx, armed_rx) = oneshot::channel::<()>();
        let timer = runtime.spawn(async move {
            // the timer must be registered before it can deregister itself
            let _ = armed_rx.await;
            tokio::time::sleep(delay).await;
            timers.remove(&handle);
            let queued = QueuedJob {
                handle,
                job,
                attempt: 1,
            };
            if sender.send(queued).await.is_err() {
                warn!(job = %job, "Job queue closed before delivery");
            }
        });

        self.timers.insert(handle, timer);
        let _ = armed_tx.send(());
        debug!(job = %job, handle = %handle, delay_ms = delay.as_millis() as u64, "Job scheduled");
        Ok(handle)
    }

    fn cancel(&self, handle: JobHandle) -> bool {
        match self.timers.remove(&handle) {
            Some((_, timer)) if !timer.is_finished() => {
                timer.abort();
                debug!(handle = %handle, "Job cancelled");
                true
            }
            _ => false,
        }
    }
}
