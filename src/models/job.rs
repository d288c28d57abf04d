// src/models/job.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a scheduled job does when it fires.
/// Persisted as JSON; cancellation matches on payload equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    AutoSubmit { attempt_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    /// Picked up by a poller. Re-claimable once its lease runs out, which
    /// only happens if the claiming process died mid-delivery.
    Claimed,
    Completed,
    Cancelled,
    /// The callback returned an error. Never re-delivered.
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Claimed => "claimed",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "claimed" => Ok(JobState::Claimed),
            "completed" => Ok(JobState::Completed),
            "cancelled" => Ok(JobState::Cancelled),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Represents the 'scheduled_jobs' table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub fire_at: DateTime<Utc>,
    pub payload: JobPayload,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new(fire_at: DateTime<Utc>, payload: JobPayload) -> Self {
        ScheduledJob {
            id: Uuid::new_v4(),
            fire_at,
            payload,
            state: JobState::Pending,
            created_at: Utc::now(),
            claimed_at: None,
        }
    }

    /// Pending and past its fire time, or claimed before `stale_before`
    /// and never resolved.
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_before: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Pending => self.fire_at <= now,
            JobState::Claimed => self.claimed_at.is_some_and(|at| at < stale_before),
            _ => false,
        }
    }

    /// Still waiting to fire or to be resolved by its claimer.
    pub fn is_open(&self) -> bool {
        matches!(self.state, JobState::Pending | JobState::Claimed)
    }
}
