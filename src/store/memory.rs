// src/store/memory.rs

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{
        attempt::{Answers, Attempt, AttemptStatus},
        job::{JobPayload, JobState, ScheduledJob},
        quiz::Quiz,
    },
    store::{
        AttemptStore, FinalizeOutcome, InsertAttempt, JobStore, QuizStore, Scorer, StoreResult,
    },
};

#[derive(Default)]
struct Inner {
    quizzes: HashMap<Uuid, Quiz>,
    attempts: HashMap<Uuid, Attempt>,
    jobs: HashMap<Uuid, ScheduledJob>,
    /// Pending and claimed jobs by fire time. Resolved jobs leave the index,
    /// so polls never scan them.
    open_jobs: BTreeSet<(DateTime<Utc>, Uuid)>,
}

/// Process-local store. One lock guards all tables, so every conditional
/// update (and finalize's two writes) is atomic. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Corrupt("memory store lock poisoned".to_string()))
    }
}

impl Inner {
    fn in_progress_for(&self, user_id: i64, quiz_id: Uuid) -> Option<&Attempt> {
        self.attempts.values().find(|a| {
            a.user_id == user_id && a.quiz_id == quiz_id && a.status == AttemptStatus::InProgress
        })
    }

    /// Moves a claimed job to a resolved state and drops it from the index.
    fn resolve_job(&mut self, id: Uuid, state: JobState) {
        if let Some(job) = self.jobs.get_mut(&id) {
            if job.state == JobState::Claimed {
                job.state = state;
                self.open_jobs.remove(&(job.fire_at, id));
            }
        }
    }
}

fn current_mut(
    attempts: &mut HashMap<Uuid, Attempt>,
    id: Uuid,
    expected_version: i64,
) -> Option<&mut Attempt> {
    attempts
        .get_mut(&id)
        .filter(|a| a.status == AttemptStatus::InProgress && a.version == expected_version)
}

#[async_trait]
impl QuizStore for MemoryStore {
    async fn insert_quiz(&self, quiz: &Quiz) -> StoreResult<()> {
        self.lock()?.quizzes.insert(quiz.id, quiz.clone());
        Ok(())
    }

    async fn find_quiz(&self, id: Uuid) -> StoreResult<Option<Quiz>> {
        Ok(self.lock()?.quizzes.get(&id).cloned())
    }

    async fn delete_quiz(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.lock()?.quizzes.remove(&id).is_some())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn insert_attempt(&self, attempt: &Attempt) -> StoreResult<InsertAttempt> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.in_progress_for(attempt.user_id, attempt.quiz_id) {
            return Ok(InsertAttempt::Existing(existing.clone()));
        }
        inner.attempts.insert(attempt.id, attempt.clone());
        Ok(InsertAttempt::Created(attempt.clone()))
    }

    async fn find_attempt(&self, id: Uuid) -> StoreResult<Option<Attempt>> {
        Ok(self.lock()?.attempts.get(&id).cloned())
    }

    async fn find_in_progress(&self, user_id: i64, quiz_id: Uuid) -> StoreResult<Option<Attempt>> {
        Ok(self.lock()?.in_progress_for(user_id, quiz_id).cloned())
    }

    async fn update_answers(
        &self,
        id: Uuid,
        expected_version: i64,
        answers: &Answers,
    ) -> StoreResult<Option<Attempt>> {
        let mut inner = self.lock()?;
        let Some(attempt) = current_mut(&mut inner.attempts, id, expected_version) else {
            return Ok(None);
        };
        attempt.answers = answers.clone();
        attempt.version += 1;
        Ok(Some(attempt.clone()))
    }

    async fn finalize_attempt(
        &self,
        id: Uuid,
        scorer: Scorer,
        submitted_at: DateTime<Utc>,
    ) -> StoreResult<FinalizeOutcome> {
        let mut inner = self.lock()?;
        let Inner { quizzes, attempts, .. } = &mut *inner;

        let Some(attempt) = attempts
            .get_mut(&id)
            .filter(|a| a.status == AttemptStatus::InProgress)
        else {
            return Ok(FinalizeOutcome::Stale);
        };
        let Some(quiz) = quizzes.get_mut(&attempt.quiz_id) else {
            return Ok(FinalizeOutcome::QuizMissing);
        };

        let score = scorer(&attempt.answers, quiz);
        quiz.total_score += score;
        quiz.attempt_count += 1;
        let quiz = quiz.clone();

        attempt.status = AttemptStatus::Submitted;
        attempt.score = Some(score);
        attempt.submitted_at = Some(submitted_at);

        Ok(FinalizeOutcome::Finalized {
            attempt: attempt.clone(),
            quiz,
        })
    }

    async fn list_attempts_for_user(&self, user_id: i64) -> StoreResult<Vec<Attempt>> {
        let inner = self.lock()?;
        let mut attempts: Vec<Attempt> = inner
            .attempts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(attempts)
    }

    async fn list_submitted_for_quiz(&self, quiz_id: Uuid) -> StoreResult<Vec<Attempt>> {
        let inner = self.lock()?;
        let mut attempts: Vec<Attempt> = inner
            .attempts
            .values()
            .filter(|a| a.quiz_id == quiz_id && a.status == AttemptStatus::Submitted)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(attempts)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &ScheduledJob) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if job.is_open() {
            inner.open_jobs.insert((job.fire_at, job.id));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn cancel_jobs(&self, payload: &JobPayload) -> StoreResult<u64> {
        let mut inner = self.lock()?;
        let Inner { jobs, open_jobs, .. } = &mut *inner;
        let mut cancelled = 0;
        open_jobs.retain(|(_, id)| match jobs.get_mut(id) {
            Some(job) if job.state == JobState::Pending && &job.payload == payload => {
                job.state = JobState::Cancelled;
                cancelled += 1;
                false
            }
            _ => true,
        });
        Ok(cancelled)
    }

    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ScheduledJob>> {
        let inner = self.lock()?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(inner
            .open_jobs
            .range(..=(now, Uuid::from_u128(u128::MAX)))
            .filter_map(|(_, id)| inner.jobs.get(id))
            .filter(|j| j.is_claimable(now, stale_before))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim_job(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        match inner.jobs.get_mut(&id) {
            Some(job) if job.is_claimable(now, stale_before) => {
                job.state = JobState::Claimed;
                job.claimed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_job(&self, id: Uuid) -> StoreResult<()> {
        self.lock()?.resolve_job(id, JobState::Completed);
        Ok(())
    }

    async fn fail_job(&self, id: Uuid) -> StoreResult<()> {
        self.lock()?.resolve_job(id, JobState::Failed);
        Ok(())
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<ScheduledJob>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }
}
