use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::{JobHandler, ScheduledJob};

/// Periodic driver for the sweep jobs
///
/// Every tick runs the inactivity sweep and the overdue-offer sweep directly against the
/// handler. Both are idempotent, so overlapping with a timer-driven job is harmless.
pub struct InactivitySweeper {
    handler: Arc<dyn JobHandler>,
    interval: Duration,
}

impl InactivitySweeper {
    pub fn new(handler: Arc<dyn JobHandler>, interval: Duration) -> Self {
        Self { handler, interval }
    }

    /// Run both sweeps once, logging failures
    pub async fn sweep_once(&self) {
        for job in [
            ScheduledJob::SweepOverdueOffers,
            ScheduledJob::SweepInactiveTacks,
        ] {
            if let Err(err) = self.handler.handle(job).await {
                error!(job = %job, error = %err, "Sweep failed");
            }
        }
    }

    /// Tick until `shutdown` changes
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_seconds = self.interval.as_secs(),
            "Inactivity sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once().await,
                _ = shutdown.changed() => break,
            }
        }
        info!("Inactivity sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketplaceResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        jobs: Mutex<Vec<ScheduledJob>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: ScheduledJob) -> MarketplaceResult<()> {
            self.jobs.lock().push(job);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweep_once_runs_both_sweeps() {
        let recorder = Arc::new(Recorder::default());
        let sweeper = InactivitySweeper::new(recorder.clone(), Duration::from_secs(60));
        sweeper.sweep_once().await;
        assert_eq!(
            *recorder.jobs.lock(),
            vec![
                ScheduledJob::SweepOverdueOffers,
                ScheduledJob::SweepInactiveTacks
            ]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let sweeper = InactivitySweeper::new(recorder.clone(), Duration::from_millis(10));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(sweeper.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(35)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        // First tick fires immediately
        assert!(recorder.jobs.lock().len() >= 2);
    }
}
