// src/services/scheduler.rs

//! Durable deadline scheduler.
//!
//! Jobs live in the store, so a job scheduled before a crash is picked up
//! by the first poll after restart. A claim is a lease: if the claiming
//! process dies before resolving the job, another poll takes it over once
//! the lease runs out. A callback that returns an error marks the job
//! failed, and failed jobs are not retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::{
    error::{SchedulerError, StoreError},
    models::job::{JobPayload, ScheduledJob},
    store::JobStore,
};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives fired jobs. Must tolerate duplicate and late deliveries.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &JobPayload) -> Result<(), HandlerError>;
}

/// Registers and cancels jobs.
#[derive(Clone)]
pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
}

impl Scheduler {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Persists a job firing at or after `fire_at`. Returns its id.
    pub async fn schedule(
        &self,
        fire_at: DateTime<Utc>,
        payload: JobPayload,
    ) -> Result<Uuid, StoreError> {
        let job = ScheduledJob::new(fire_at, payload);
        self.jobs.insert_job(&job).await?;
        tracing::debug!(job_id = %job.id, fire_at = %fire_at, "Job scheduled");
        Ok(job.id)
    }

    /// Cancels pending jobs carrying `payload`. Jobs already claimed by a
    /// poller are unaffected.
    pub async fn cancel(&self, payload: &JobPayload) -> Result<u64, StoreError> {
        let cancelled = self.jobs.cancel_jobs(payload).await?;
        tracing::debug!(cancelled, ?payload, "Jobs cancelled");
        Ok(cancelled)
    }
}

/// Outcome of one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Background loop that claims due jobs and hands them to a `JobHandler`.
pub struct Poller {
    jobs: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    interval: Duration,
    batch_size: i64,
    /// How long a claim holds before another poll may take the job over.
    /// Must exceed the slowest callback.
    lease: Duration,
}

impl Poller {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        interval: Duration,
        batch_size: i64,
        lease: Duration,
    ) -> Self {
        Self {
            jobs,
            handler,
            interval,
            batch_size,
            lease,
        }
    }

    /// Claims every job due at `now` (up to the batch size), including jobs
    /// whose claim expired, and runs the callbacks concurrently. Returns once
    /// they have all finished.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let stale_before = chrono::Duration::from_std(self.lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let due = self.jobs.due_jobs(now, stale_before, self.batch_size).await?;
        let mut report = TickReport::default();
        let mut running = JoinSet::new();

        for job in due {
            if job.claimed_at.is_some() {
                tracing::warn!(job_id = %job.id, claimed_at = ?job.claimed_at, "Taking over expired job claim");
            }
            match self.jobs.claim_job(job.id, now, stale_before).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(job_id = %job.id, "Job claimed elsewhere, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to claim job");
                    continue;
                }
            }
            report.claimed += 1;

            let handler = Arc::clone(&self.handler);
            running.spawn(async move {
                let result = handler.handle(&job.payload).await;
                (job.id, result)
            });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((job_id, Ok(()))) => {
                    if let Err(e) = self.jobs.complete_job(job_id).await {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to mark job completed");
                    }
                    report.completed += 1;
                }
                Ok((job_id, Err(e))) => {
                    let failure = SchedulerError::DeliveryFailure {
                        job_id,
                        reason: e.to_string(),
                    };
                    tracing::error!(job_id = %job_id, "{}", failure);
                    if let Err(e) = self.jobs.fail_job(job_id).await {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to mark job failed");
                    }
                    report.failed += 1;
                }
                Err(e) => {
                    // The job stays claimed and is taken over after its lease.
                    tracing::error!(error = %e, "Job callback panicked");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Polls until `shutdown` flips to true or its sender is dropped.
    /// The first poll happens immediately, which recovers jobs that came
    /// due while the process was down.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "Deadline poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_due(Utc::now()).await {
                        Ok(report) if report.claimed > 0 => {
                            tracing::info!(
                                claimed = report.claimed,
                                completed = report.completed,
                                failed = report.failed,
                                "Deadline poll"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Deadline poll failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Deadline poller stopped");
    }
}
