// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, types::Json};
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{
        attempt::{AnswerEntry, Answers, Attempt, from_entries, to_entries},
        job::{JobPayload, JobState, ScheduledJob},
        question::Question,
        quiz::Quiz,
    },
    store::{
        AttemptStore, FinalizeOutcome, InsertAttempt, JobStore, QuizStore, Scorer, StoreResult,
    },
};

const QUIZ_COLUMNS: &str = "id, owner_id, title, questions, time_limit_minutes, \
     date_opens, date_closes, total_score, attempt_count, created_at";

const ATTEMPT_COLUMNS: &str = "id, user_id, quiz_id, status, start_time, end_time, \
     score, answers, version, submitted_at";

const JOB_COLUMNS: &str = "id, fire_at, payload, state, created_at, claimed_at";

/// Postgres-backed store. Queries are checked at runtime.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn resolve_job(&self, id: Uuid, state: JobState) -> StoreResult<()> {
        sqlx::query("UPDATE scheduled_jobs SET state = $2 WHERE id = $1 AND state = 'claimed'")
            .bind(id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct QuizRow {
    id: Uuid,
    owner_id: i64,
    title: String,
    questions: Json<Vec<Question>>,
    time_limit_minutes: i32,
    date_opens: DateTime<Utc>,
    date_closes: DateTime<Utc>,
    total_score: i64,
    attempt_count: i64,
    created_at: DateTime<Utc>,
}

impl From<QuizRow> for Quiz {
    fn from(row: QuizRow) -> Self {
        Quiz {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            questions: row.questions.0,
            time_limit_minutes: row.time_limit_minutes,
            date_opens: row.date_opens,
            date_closes: row.date_closes,
            total_score: row.total_score,
            attempt_count: row.attempt_count,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct AttemptRow {
    id: Uuid,
    user_id: i64,
    quiz_id: Uuid,
    status: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    score: Option<i64>,
    answers: Json<Vec<AnswerEntry>>,
    version: i64,
    submitted_at: Option<DateTime<Utc>>,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(Attempt {
            id: row.id,
            user_id: row.user_id,
            quiz_id: row.quiz_id,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            start_time: row.start_time,
            end_time: row.end_time,
            score: row.score,
            answers: from_entries(row.answers.0),
            version: row.version,
            submitted_at: row.submitted_at,
        })
    }
}

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    fire_at: DateTime<Utc>,
    payload: Json<JobPayload>,
    state: String,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for ScheduledJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(ScheduledJob {
            id: row.id,
            fire_at: row.fire_at,
            payload: row.payload.0,
            state: row.state.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
        })
    }
}

fn into_attempts(rows: Vec<AttemptRow>) -> StoreResult<Vec<Attempt>> {
    rows.into_iter().map(Attempt::try_from).collect()
}

/// Atomic in-place increment of a quiz's aggregates.
/// Returns the updated quiz, or `None` if it no longer exists.
async fn apply_quiz_delta(
    conn: &mut PgConnection,
    quiz_id: Uuid,
    score: i64,
) -> StoreResult<Option<Quiz>> {
    let row = sqlx::query_as::<_, QuizRow>(&format!(
        "UPDATE quizzes
         SET total_score = total_score + $2, attempt_count = attempt_count + 1
         WHERE id = $1
         RETURNING {QUIZ_COLUMNS}"
    ))
    .bind(quiz_id)
    .bind(score)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(Quiz::from))
}

#[async_trait]
impl QuizStore for PgStore {
    async fn insert_quiz(&self, quiz: &Quiz) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO quizzes ({QUIZ_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(quiz.id)
        .bind(quiz.owner_id)
        .bind(&quiz.title)
        .bind(Json(&quiz.questions))
        .bind(quiz.time_limit_minutes)
        .bind(quiz.date_opens)
        .bind(quiz.date_closes)
        .bind(quiz.total_score)
        .bind(quiz.attempt_count)
        .bind(quiz.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_quiz(&self, id: Uuid) -> StoreResult<Option<Quiz>> {
        let row = sqlx::query_as::<_, QuizRow>(&format!(
            "SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Quiz::from))
    }

    async fn delete_quiz(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM quizzes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn insert_attempt(&self, attempt: &Attempt) -> StoreResult<InsertAttempt> {
        // The partial unique index admits one in-progress row per (user, quiz).
        // If the conflicting row is submitted before we can read it, try again.
        for _ in 0..3 {
            let inserted = sqlx::query_as::<_, AttemptRow>(&format!(
                "INSERT INTO attempts ({ATTEMPT_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (user_id, quiz_id) WHERE status = 'in_progress' DO NOTHING
                 RETURNING {ATTEMPT_COLUMNS}"
            ))
            .bind(attempt.id)
            .bind(attempt.user_id)
            .bind(attempt.quiz_id)
            .bind(attempt.status.as_str())
            .bind(attempt.start_time)
            .bind(attempt.end_time)
            .bind(attempt.score)
            .bind(Json(attempt.answer_entries()))
            .bind(attempt.version)
            .bind(attempt.submitted_at)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = inserted {
                return Ok(InsertAttempt::Created(row.try_into()?));
            }
            if let Some(existing) = self.find_in_progress(attempt.user_id, attempt.quiz_id).await? {
                return Ok(InsertAttempt::Existing(existing));
            }
        }
        Err(StoreError::Corrupt(format!(
            "could not insert or find in-progress attempt for user {} on quiz {}",
            attempt.user_id, attempt.quiz_id
        )))
    }

    async fn find_attempt(&self, id: Uuid) -> StoreResult<Option<Attempt>> {
        sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Attempt::try_from)
        .transpose()
    }

    async fn find_in_progress(&self, user_id: i64, quiz_id: Uuid) -> StoreResult<Option<Attempt>> {
        sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts
             WHERE user_id = $1 AND quiz_id = $2 AND status = 'in_progress'"
        ))
        .bind(user_id)
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Attempt::try_from)
        .transpose()
    }

    async fn update_answers(
        &self,
        id: Uuid,
        expected_version: i64,
        answers: &Answers,
    ) -> StoreResult<Option<Attempt>> {
        sqlx::query_as::<_, AttemptRow>(&format!(
            "UPDATE attempts SET answers = $3, version = version + 1
             WHERE id = $1 AND version = $2 AND status = 'in_progress'
             RETURNING {ATTEMPT_COLUMNS}"
        ))
        .bind(id)
        .bind(expected_version)
        .bind(Json(to_entries(answers)))
        .fetch_optional(&self.pool)
        .await?
        .map(Attempt::try_from)
        .transpose()
    }

    async fn finalize_attempt(
        &self,
        id: Uuid,
        scorer: Scorer,
        submitted_at: DateTime<Utc>,
    ) -> StoreResult<FinalizeOutcome> {
        let mut tx = self.pool.begin().await?;

        // The row lock makes answer writes wait until we commit or roll back,
        // so the score below is computed from the answers that get stored.
        let locked = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts
             WHERE id = $1 AND status = 'in_progress'
             FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = locked else {
            tx.rollback().await?;
            return Ok(FinalizeOutcome::Stale);
        };
        let attempt = Attempt::try_from(row)?;

        let quiz = sqlx::query_as::<_, QuizRow>(&format!(
            "SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1 FOR UPDATE"
        ))
        .bind(attempt.quiz_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Quiz::from);

        let Some(quiz) = quiz else {
            tx.rollback().await?;
            return Ok(FinalizeOutcome::QuizMissing);
        };
        let score = scorer(&attempt.answers, &quiz);

        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "UPDATE attempts SET status = 'submitted', score = $2, submitted_at = $3
             WHERE id = $1
             RETURNING {ATTEMPT_COLUMNS}"
        ))
        .bind(id)
        .bind(score)
        .bind(submitted_at)
        .fetch_one(&mut *tx)
        .await?;
        let attempt = Attempt::try_from(row)?;

        let Some(quiz) = apply_quiz_delta(&mut tx, quiz.id, score).await? else {
            tx.rollback().await?;
            return Ok(FinalizeOutcome::QuizMissing);
        };

        tx.commit().await?;
        Ok(FinalizeOutcome::Finalized { attempt, quiz })
    }

    async fn list_attempts_for_user(&self, user_id: i64) -> StoreResult<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE user_id = $1 ORDER BY start_time DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        into_attempts(rows)
    }

    async fn list_submitted_for_quiz(&self, quiz_id: Uuid) -> StoreResult<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts
             WHERE quiz_id = $1 AND status = 'submitted'
             ORDER BY submitted_at DESC"
        ))
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;
        into_attempts(rows)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: &ScheduledJob) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO scheduled_jobs ({JOB_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(job.id)
        .bind(job.fire_at)
        .bind(Json(&job.payload))
        .bind(job.state.as_str())
        .bind(job.created_at)
        .bind(job.claimed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_jobs(&self, payload: &JobPayload) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET state = 'cancelled'
             WHERE payload = $1 AND state = 'pending'",
        )
        .bind(Json(payload))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs
             WHERE (state = 'pending' AND fire_at <= $1)
                OR (state = 'claimed' AND claimed_at < $2)
             ORDER BY fire_at
             LIMIT $3"
        ))
        .bind(now)
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ScheduledJob::try_from).collect()
    }

    async fn claim_job(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET state = $4, claimed_at = $2
             WHERE id = $1
               AND ((state = 'pending' AND fire_at <= $2)
                 OR (state = 'claimed' AND claimed_at < $3))",
        )
        .bind(id)
        .bind(now)
        .bind(stale_before)
        .bind(JobState::Claimed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_job(&self, id: Uuid) -> StoreResult<()> {
        self.resolve_job(id, JobState::Completed).await
    }

    async fn fail_job(&self, id: Uuid) -> StoreResult<()> {
        self.resolve_job(id, JobState::Failed).await
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<ScheduledJob>> {
        sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(ScheduledJob::try_from)
        .transpose()
    }
}
