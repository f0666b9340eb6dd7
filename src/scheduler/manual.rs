use parking_lot::Mutex;
use std::time::Duration;

use super::{JobHandle, ScheduledJob, Scheduler, SchedulerResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedJob {
    pub handle: JobHandle,
    pub delay: Duration,
    pub job: ScheduledJob,
    pub cancelled: bool,
}

/// Scheduler that records jobs instead of running them
///
/// Tests inspect what was scheduled and fire jobs by hand through the marketplace's
/// [`JobHandler`](super::JobHandler), which keeps timing out of the assertions.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    jobs: Mutex<Vec<RecordedJob>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job ever scheduled, cancelled ones included
    pub fn recorded(&self) -> Vec<RecordedJob> {
        self.jobs.lock().clone()
    }

    /// Jobs that were scheduled and not cancelled
    pub fn pending(&self) -> Vec<ScheduledJob> {
        self.jobs
            .lock()
            .iter()
            .filter(|recorded| !recorded.cancelled)
            .map(|recorded| recorded.job)
            .collect()
    }

    /// Remove and return the pending jobs
    pub fn drain(&self) -> Vec<ScheduledJob> {
        let mut jobs = self.jobs.lock();
        let pending = jobs
            .iter()
            .filter(|recorded| !recorded.cancelled)
            .map(|recorded| recorded.job)
            .collect();
        jobs.clear();
        pending
    }

    pub fn delay_of(&self, job: &ScheduledJob) -> Option<Duration> {
        self.jobs
            .lock()
            .iter()
            .find(|recorded| &recorded.job == job)
            .map(|recorded| recorded.delay)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, job: ScheduledJob) -> SchedulerResult<JobHandle> {
        let handle = JobHandle::new();
        self.jobs.lock().push(RecordedJob {
            handle,
            delay,
            job,
            cancelled: false,
        });
        Ok(handle)
    }

    fn cancel(&self, handle: JobHandle) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs
            .iter_mut()
            .find(|recorded| recorded.handle == handle && !recorded.cancelled)
        {
            Some(recorded) => {
                recorded.cancelled = true;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TackId;

    #[test]
    fn test_records_and_cancels() {
        let scheduler = ManualScheduler::new();
        let warn = ScheduledJob::WarnTackExpiring {
            tack_id: TackId::new(),
        };
        let handle = scheduler.schedule(Duration::from_secs(90), warn).unwrap();
        scheduler
            .schedule(Duration::from_secs(1), ScheduledJob::SweepInactiveTacks)
            .unwrap();

        assert_eq!(scheduler.delay_of(&warn), Some(Duration::from_secs(90)));
        assert!(scheduler.cancel(handle));
        assert_eq!(scheduler.pending(), vec![ScheduledJob::SweepInactiveTacks]);
        assert_eq!(scheduler.recorded().len(), 2);

        assert_eq!(scheduler.drain(), vec![ScheduledJob::SweepInactiveTacks]);
        assert!(scheduler.recorded().is_empty());
    }
}
