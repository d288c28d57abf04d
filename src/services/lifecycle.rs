// src/services/lifecycle.rs

//! Attempt lifecycle: start, save answers, submit, and deadline auto-submit.
//!
//! Client submits and deadline auto-submits race freely. Whichever wins the
//! conditional finalize write counts the attempt into the quiz aggregates;
//! the other observes `submitted` and backs off. Finalization scores inside
//! the store's locked write, so answer writes can delay it but never defeat it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AttemptError,
    models::{attempt::Attempt, job::JobPayload, quiz::Quiz},
    services::{
        scheduler::{HandlerError, JobHandler, Scheduler},
        scoring,
    },
    store::{AttemptStore, FinalizeOutcome, InsertAttempt, QuizStore, Store},
};

/// Compare-and-swap rounds of an answer write before giving up with `Contended`.
const MAX_CAS_ROUNDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Created(Attempt),
    /// The user already had this quiz in progress.
    Resumed(Attempt),
}

impl StartOutcome {
    pub fn attempt(&self) -> &Attempt {
        match self {
            StartOutcome::Created(a) | StartOutcome::Resumed(a) => a,
        }
    }

    pub fn into_attempt(self) -> Attempt {
        match self {
            StartOutcome::Created(a) | StartOutcome::Resumed(a) => a,
        }
    }
}

pub struct AttemptService {
    store: Arc<dyn Store>,
    scheduler: Scheduler,
}

impl AttemptService {
    pub fn new(store: Arc<dyn Store>, scheduler: Scheduler) -> Self {
        Self { store, scheduler }
    }

    /// Starts an attempt, or resumes the user's open attempt on this quiz.
    ///
    /// A new attempt's deadline is the earlier of the quiz close time and
    /// now plus the time limit; an auto-submit job is registered for it.
    pub async fn start(&self, user_id: i64, quiz_id: Uuid) -> Result<StartOutcome, AttemptError> {
        let quiz = self
            .store
            .find_quiz(quiz_id)
            .await?
            .ok_or(AttemptError::QuizNotFound)?;

        if let Some(existing) = self.store.find_in_progress(user_id, quiz_id).await? {
            tracing::info!(attempt_id = %existing.id, user_id, "Resuming attempt");
            return Ok(StartOutcome::Resumed(existing));
        }

        let now = Utc::now();
        if !quiz.is_open_at(now) {
            return Err(AttemptError::QuizNotOpen);
        }

        let attempt = Attempt::begin(user_id, &quiz, now);
        let payload = JobPayload::AutoSubmit {
            attempt_id: attempt.id,
        };

        // The job goes in first so that no stored attempt is ever without one.
        // A job whose attempt never got stored fires as a no-op.
        self.scheduler.schedule(attempt.end_time, payload.clone()).await?;

        match self.store.insert_attempt(&attempt).await? {
            InsertAttempt::Created(created) => {
                tracing::info!(
                    attempt_id = %created.id,
                    quiz_id = %quiz_id,
                    user_id,
                    end_time = %created.end_time,
                    "Attempt started"
                );
                Ok(StartOutcome::Created(created))
            }
            InsertAttempt::Existing(existing) => {
                if let Err(e) = self.scheduler.cancel(&payload).await {
                    tracing::warn!(error = %e, "Failed to cancel job of a discarded attempt");
                }
                tracing::info!(attempt_id = %existing.id, user_id, "Resuming attempt after concurrent start");
                Ok(StartOutcome::Resumed(existing))
            }
        }
    }

    /// Sets the answer for one question, or clears it when `selected_answer`
    /// is empty. Time remaining is not re-checked here.
    pub async fn save_answer(
        &self,
        attempt_id: Uuid,
        requester_id: i64,
        question_id: &str,
        selected_answer: &str,
    ) -> Result<Attempt, AttemptError> {
        let mut attempt = self.load(attempt_id).await?;
        if attempt.user_id != requester_id {
            return Err(AttemptError::Forbidden);
        }

        for _ in 0..MAX_CAS_ROUNDS {
            if attempt.is_submitted() {
                return Err(AttemptError::AlreadyFinalized);
            }

            let mut answers = attempt.answers.clone();
            if selected_answer.is_empty() {
                answers.remove(question_id);
            } else {
                answers.insert(question_id.to_string(), selected_answer.to_string());
            }

            match self
                .store
                .update_answers(attempt_id, attempt.version, &answers)
                .await?
            {
                Some(updated) => return Ok(updated),
                None => attempt = self.load(attempt_id).await?,
            }
        }

        Err(AttemptError::Contended)
    }

    /// Client-triggered finalization.
    ///
    /// Returns `AlreadyFinalized` if the attempt was submitted before, by the
    /// client or by the deadline, so callers can tell whose submit counted.
    pub async fn submit(
        &self,
        attempt_id: Uuid,
        requester_id: i64,
    ) -> Result<(Attempt, Quiz), AttemptError> {
        let attempt = self.load(attempt_id).await?;
        if attempt.user_id != requester_id {
            return Err(AttemptError::Forbidden);
        }
        if attempt.is_submitted() {
            return Err(AttemptError::AlreadyFinalized);
        }

        let (attempt, quiz) = self.finalize(&attempt).await?;

        // Best effort. If the job already fired, its auto-submit is a no-op.
        if let Err(e) = self
            .scheduler
            .cancel(&JobPayload::AutoSubmit { attempt_id })
            .await
        {
            tracing::warn!(attempt_id = %attempt_id, error = %e, "Failed to cancel auto-submit job");
        }

        tracing::info!(
            attempt_id = %attempt.id,
            score = ?attempt.score,
            "Attempt submitted"
        );
        Ok((attempt, quiz))
    }

    /// Deadline-triggered finalization. Missing or already submitted
    /// attempts are a no-op, which makes duplicate job deliveries safe.
    pub async fn auto_submit(&self, attempt_id: Uuid) -> Result<(), AttemptError> {
        let Some(attempt) = self.store.find_attempt(attempt_id).await? else {
            tracing::debug!(attempt_id = %attempt_id, "Auto-submit for unknown attempt ignored");
            return Ok(());
        };
        if attempt.is_submitted() {
            tracing::debug!(attempt_id = %attempt_id, "Auto-submit for submitted attempt ignored");
            return Ok(());
        }

        match self.finalize(&attempt).await {
            Ok((attempt, _)) => {
                tracing::info!(
                    attempt_id = %attempt.id,
                    score = ?attempt.score,
                    "Attempt auto-submitted at deadline"
                );
                Ok(())
            }
            Err(AttemptError::AlreadyFinalized) => {
                tracing::debug!(attempt_id = %attempt_id, "Auto-submit lost the race to a submit");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Scores the stored answers and commits `submitted` plus the quiz
    /// aggregate increment in one store-side step. Only a finalize that got
    /// there first can make this lose.
    async fn finalize(&self, attempt: &Attempt) -> Result<(Attempt, Quiz), AttemptError> {
        match self
            .store
            .finalize_attempt(attempt.id, scoring::score, Utc::now())
            .await?
        {
            FinalizeOutcome::Finalized { attempt, quiz } => Ok((attempt, quiz)),
            FinalizeOutcome::Stale => Err(AttemptError::AlreadyFinalized),
            FinalizeOutcome::QuizMissing => Err(self.dangling(attempt)),
        }
    }

    fn dangling(&self, attempt: &Attempt) -> AttemptError {
        tracing::error!(
            attempt_id = %attempt.id,
            quiz_id = %attempt.quiz_id,
            "Attempt references a deleted quiz and cannot be finalized"
        );
        AttemptError::DanglingReference
    }

    /// Full attempt, visible to its participant and to the quiz owner.
    pub async fn get(&self, attempt_id: Uuid, requester_id: i64) -> Result<Attempt, AttemptError> {
        let attempt = self.load(attempt_id).await?;
        if attempt.user_id == requester_id {
            return Ok(attempt);
        }

        match self.store.find_quiz(attempt.quiz_id).await? {
            Some(quiz) if quiz.owner_id == requester_id => Ok(attempt),
            _ => Err(AttemptError::Forbidden),
        }
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Attempt>, AttemptError> {
        Ok(self.store.list_attempts_for_user(user_id).await?)
    }

    /// Submitted attempts of a quiz. Owner only.
    pub async fn list_submissions(
        &self,
        quiz_id: Uuid,
        requester_id: i64,
    ) -> Result<Vec<Attempt>, AttemptError> {
        let quiz = self
            .store
            .find_quiz(quiz_id)
            .await?
            .ok_or(AttemptError::QuizNotFound)?;
        if quiz.owner_id != requester_id {
            return Err(AttemptError::Forbidden);
        }
        Ok(self.store.list_submitted_for_quiz(quiz_id).await?)
    }

    async fn load(&self, attempt_id: Uuid) -> Result<Attempt, AttemptError> {
        self.store
            .find_attempt(attempt_id)
            .await?
            .ok_or(AttemptError::NotFound)
    }
}

/// Routes fired deadline jobs to auto-submit.
#[async_trait]
impl JobHandler for AttemptService {
    async fn handle(&self, payload: &JobPayload) -> Result<(), HandlerError> {
        match payload {
            JobPayload::AutoSubmit { attempt_id } => {
                self.auto_submit(*attempt_id).await.map_err(HandlerError::from)
            }
        }
    }
}
