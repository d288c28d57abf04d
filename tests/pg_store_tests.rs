// tests/pg_store_tests.rs

//! Runs against the database named by DATABASE_URL. Each test skips when
//! it is unset, and uses fresh ids so the tests can share one database.

use chrono::{Duration, Utc};
use quiz_attempts::models::{
    attempt::{Answers, Attempt, AttemptStatus},
    job::{JobPayload, JobState, ScheduledJob},
    question::{Question, QuestionType},
    quiz::Quiz,
};
use quiz_attempts::services::scoring;
use quiz_attempts::store::{
    AttemptStore, FinalizeOutcome, InsertAttempt, JobStore, PgStore, QuizStore,
};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

async fn pg_store() -> Option<PgStore> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing");

    let store = PgStore::new(pool);
    store.migrate().await.expect("Failed to migrate database");
    Some(store)
}

/// A user id no other test run is using.
fn fresh_user() -> i64 {
    (Uuid::new_v4().as_u128() % 1_000_000_000) as i64 + 1
}

/// One short-answer question whose answer is "yes".
async fn seed_quiz(store: &PgStore) -> Quiz {
    let now = Utc::now();
    let quiz = Quiz {
        id: Uuid::new_v4(),
        owner_id: fresh_user(),
        title: "Postgres".to_string(),
        questions: vec![Question {
            id: "q1".to_string(),
            question_type: QuestionType::ShortAnswer,
            content: "Ready?".to_string(),
            options: vec![],
            correct_answer: "yes".to_string(),
        }],
        time_limit_minutes: 5,
        date_opens: now - Duration::hours(1),
        date_closes: now + Duration::hours(1),
        total_score: 0,
        attempt_count: 0,
        created_at: now,
    };
    store.insert_quiz(&quiz).await.expect("Failed to insert quiz");
    quiz
}

fn answered(answer: &str) -> Answers {
    let mut answers = Answers::new();
    answers.insert("q1".to_string(), answer.to_string());
    answers
}

#[tokio::test]
async fn insert_returns_existing_in_progress_attempt() {
    let Some(store) = pg_store().await else { return };
    let quiz = seed_quiz(&store).await;
    let user = fresh_user();

    let first = Attempt::begin(user, &quiz, Utc::now());
    let second = Attempt::begin(user, &quiz, Utc::now());

    let created = store.insert_attempt(&first).await.unwrap();
    assert!(matches!(created, InsertAttempt::Created(ref a) if a.id == first.id));
    let existing = store.insert_attempt(&second).await.unwrap();
    assert!(matches!(existing, InsertAttempt::Existing(ref a) if a.id == first.id));

    // Once the first is submitted, a new one may start.
    store
        .finalize_attempt(first.id, scoring::score, Utc::now())
        .await
        .unwrap();
    let third = store.insert_attempt(&second).await.unwrap();
    assert!(matches!(third, InsertAttempt::Created(ref a) if a.id == second.id));
}

#[tokio::test]
async fn answer_writes_are_version_checked_and_round_trip() {
    let Some(store) = pg_store().await else { return };
    let quiz = seed_quiz(&store).await;
    let attempt = Attempt::begin(fresh_user(), &quiz, Utc::now());
    store.insert_attempt(&attempt).await.unwrap();

    let updated = store
        .update_answers(attempt.id, 0, &answered("yes"))
        .await
        .unwrap()
        .expect("first write applies");
    assert_eq!(updated.version, 1);
    assert_eq!(updated.status, AttemptStatus::InProgress);

    let stale = store.update_answers(attempt.id, 0, &answered("no")).await.unwrap();
    assert!(stale.is_none());

    let stored = store.find_attempt(attempt.id).await.unwrap().unwrap();
    assert_eq!(stored.answers, answered("yes"));
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn finalize_scores_current_answers_and_increments_quiz_once() {
    let Some(store) = pg_store().await else { return };
    let quiz = seed_quiz(&store).await;
    let attempt = Attempt::begin(fresh_user(), &quiz, Utc::now());
    store.insert_attempt(&attempt).await.unwrap();
    store.update_answers(attempt.id, 0, &answered("yes")).await.unwrap();

    let outcome = store
        .finalize_attempt(attempt.id, scoring::score, Utc::now())
        .await
        .unwrap();
    let FinalizeOutcome::Finalized { attempt: finalized, quiz: updated } = outcome else {
        panic!("expected finalize to apply");
    };
    assert_eq!(finalized.status, AttemptStatus::Submitted);
    assert_eq!(finalized.score, Some(1));
    assert_eq!((updated.total_score, updated.attempt_count), (1, 1));

    // A second finalize and a late answer write both lose.
    assert_eq!(
        store.finalize_attempt(attempt.id, scoring::score, Utc::now()).await.unwrap(),
        FinalizeOutcome::Stale
    );
    assert!(store.update_answers(attempt.id, 1, &answered("no")).await.unwrap().is_none());

    let reloaded = store.find_quiz(quiz.id).await.unwrap().unwrap();
    assert_eq!((reloaded.total_score, reloaded.attempt_count), (1, 1));
    let listed = store.list_submitted_for_quiz(quiz.id).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn concurrent_finalizes_count_once() {
    let Some(store) = pg_store().await else { return };
    let quiz = seed_quiz(&store).await;
    let attempt = Attempt::begin(fresh_user(), &quiz, Utc::now());
    store.insert_attempt(&attempt).await.unwrap();

    let (a, b) = tokio::join!(
        store.finalize_attempt(attempt.id, scoring::score, Utc::now()),
        store.finalize_attempt(attempt.id, scoring::score, Utc::now()),
    );
    let finalized = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| matches!(o, FinalizeOutcome::Finalized { .. }))
        .count();
    assert_eq!(finalized, 1);

    let reloaded = store.find_quiz(quiz.id).await.unwrap().unwrap();
    assert_eq!(reloaded.attempt_count, 1);
}

#[tokio::test]
async fn finalize_rolls_back_when_quiz_is_gone() {
    let Some(store) = pg_store().await else { return };
    let quiz = seed_quiz(&store).await;
    let attempt = Attempt::begin(fresh_user(), &quiz, Utc::now());
    store.insert_attempt(&attempt).await.unwrap();
    assert!(store.delete_quiz(quiz.id).await.unwrap());

    assert_eq!(
        store.finalize_attempt(attempt.id, scoring::score, Utc::now()).await.unwrap(),
        FinalizeOutcome::QuizMissing
    );

    let stored = store.find_attempt(attempt.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AttemptStatus::InProgress);
    assert_eq!(stored.score, None);
    assert_eq!(stored.submitted_at, None);
}

#[tokio::test]
async fn cancel_matches_payload_exactly() {
    let Some(store) = pg_store().await else { return };
    let now = Utc::now();
    let target = ScheduledJob::new(now, JobPayload::AutoSubmit { attempt_id: Uuid::new_v4() });
    let other = ScheduledJob::new(now, JobPayload::AutoSubmit { attempt_id: Uuid::new_v4() });
    store.insert_job(&target).await.unwrap();
    store.insert_job(&other).await.unwrap();

    assert_eq!(store.cancel_jobs(&target.payload).await.unwrap(), 1);
    assert_eq!(store.cancel_jobs(&target.payload).await.unwrap(), 0);

    let cancelled = store.find_job(target.id).await.unwrap().unwrap();
    assert_eq!(cancelled.state, JobState::Cancelled);
    assert_eq!(cancelled.payload, target.payload);
    let untouched = store.find_job(other.id).await.unwrap().unwrap();
    assert_eq!(untouched.state, JobState::Pending);
}

#[tokio::test]
async fn claim_has_a_single_winner() {
    let Some(store) = pg_store().await else { return };
    let now = Utc::now();
    let lease_start = now - Duration::minutes(5);
    let job = ScheduledJob::new(now, JobPayload::AutoSubmit { attempt_id: Uuid::new_v4() });
    store.insert_job(&job).await.unwrap();

    let (a, b, c) = tokio::join!(
        store.claim_job(job.id, now, lease_start),
        store.claim_job(job.id, now, lease_start),
        store.claim_job(job.id, now, lease_start),
    );
    let winners = [a.unwrap(), b.unwrap(), c.unwrap()].iter().filter(|w| **w).count();
    assert_eq!(winners, 1);

    let claimed = store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(claimed.state, JobState::Claimed);
    assert!(claimed.claimed_at.is_some());
}

#[tokio::test]
async fn expired_claim_is_taken_over_but_failed_job_is_not() {
    let Some(store) = pg_store().await else { return };
    let claimed_at = Utc::now();
    let crashed = ScheduledJob::new(claimed_at, JobPayload::AutoSubmit { attempt_id: Uuid::new_v4() });
    let failed = ScheduledJob::new(claimed_at, JobPayload::AutoSubmit { attempt_id: Uuid::new_v4() });
    store.insert_job(&crashed).await.unwrap();
    store.insert_job(&failed).await.unwrap();
    let lease_start = claimed_at - Duration::minutes(5);
    assert!(store.claim_job(crashed.id, claimed_at, lease_start).await.unwrap());
    assert!(store.claim_job(failed.id, claimed_at, lease_start).await.unwrap());
    store.fail_job(failed.id).await.unwrap();

    // Inside the lease nobody may take the claim.
    assert!(!store.claim_job(crashed.id, claimed_at, lease_start).await.unwrap());

    let later = claimed_at + Duration::minutes(10);
    let stale_before = later - Duration::minutes(5);
    let due: Vec<Uuid> = store
        .due_jobs(later, stale_before, 10_000)
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert!(due.contains(&crashed.id));
    assert!(!due.contains(&failed.id));

    assert!(store.claim_job(crashed.id, later, stale_before).await.unwrap());
    assert!(!store.claim_job(failed.id, later, stale_before).await.unwrap());
    store.complete_job(crashed.id).await.unwrap();
    assert_eq!(
        store.find_job(crashed.id).await.unwrap().unwrap().state,
        JobState::Completed
    );
    assert_eq!(
        store.find_job(failed.id).await.unwrap().unwrap().state,
        JobState::Failed
    );
}
