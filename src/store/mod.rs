// src/store/mod.rs

//! Persistence seams for quizzes, attempts and scheduled jobs.
//!
//! Every write that must not be lost under concurrency is expressed as a
//! conditional update here, never as a read-modify-write in the caller.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{
        attempt::{Answers, Attempt},
        job::{JobPayload, ScheduledJob},
        quiz::Quiz,
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Scores an attempt's answers against its quiz. Called by the store while
/// the attempt is locked, so the score always matches the stored answers.
pub type Scorer = fn(&Answers, &Quiz) -> i64;

/// Result of inserting a new attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertAttempt {
    Created(Attempt),
    /// An in-progress attempt for the same (user, quiz) already existed.
    Existing(Attempt),
}

/// Result of the conditional finalize write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Attempt marked submitted and quiz aggregates incremented, atomically.
    Finalized { attempt: Attempt, quiz: Quiz },
    /// The attempt is missing or no longer in progress. Nothing was written.
    Stale,
    /// The referenced quiz is gone. Nothing was written.
    QuizMissing,
}

#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn insert_quiz(&self, quiz: &Quiz) -> StoreResult<()>;

    async fn find_quiz(&self, id: Uuid) -> StoreResult<Option<Quiz>>;

    /// Returns false if no quiz had this id.
    async fn delete_quiz(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Inserts `attempt` unless the user already has an in-progress attempt
    /// on the same quiz, in which case that attempt is returned untouched.
    async fn insert_attempt(&self, attempt: &Attempt) -> StoreResult<InsertAttempt>;

    async fn find_attempt(&self, id: Uuid) -> StoreResult<Option<Attempt>>;

    async fn find_in_progress(&self, user_id: i64, quiz_id: Uuid) -> StoreResult<Option<Attempt>>;

    /// Replaces the answers if the attempt is still in progress at
    /// `expected_version`; bumps the version. `None` when the condition failed.
    async fn update_answers(
        &self,
        id: Uuid,
        expected_version: i64,
        answers: &Answers,
    ) -> StoreResult<Option<Attempt>>;

    /// If the attempt is still in progress, locks it, scores its current
    /// answers with `scorer`, marks it submitted, and in the same transaction
    /// adds the score to the quiz's total and one to its attempt count.
    /// Concurrent answer writes cannot make this fail.
    async fn finalize_attempt(
        &self,
        id: Uuid,
        scorer: Scorer,
        submitted_at: DateTime<Utc>,
    ) -> StoreResult<FinalizeOutcome>;

    /// Newest first.
    async fn list_attempts_for_user(&self, user_id: i64) -> StoreResult<Vec<Attempt>>;

    /// Submitted attempts only, newest first.
    async fn list_submitted_for_quiz(&self, quiz_id: Uuid) -> StoreResult<Vec<Attempt>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Durable once this returns.
    async fn insert_job(&self, job: &ScheduledJob) -> StoreResult<()>;

    /// Cancels pending jobs whose payload equals `payload`. Returns how many.
    async fn cancel_jobs(&self, payload: &JobPayload) -> StoreResult<u64>;

    /// Pending jobs with `fire_at <= now`, plus claimed jobs whose claim is
    /// older than `stale_before`. Earliest first.
    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ScheduledJob>>;

    /// Claims a pending job, or takes over a claim older than `stale_before`.
    /// Exactly one concurrent caller wins.
    async fn claim_job(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn complete_job(&self, id: Uuid) -> StoreResult<()>;

    /// Marks a claimed job failed. Failed jobs are never claimed again.
    async fn fail_job(&self, id: Uuid) -> StoreResult<()>;

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<ScheduledJob>>;
}

/// Everything the service needs from one backing store.
pub trait Store: QuizStore + AttemptStore + JobStore {}

impl<T: QuizStore + AttemptStore + JobStore> Store for T {}
