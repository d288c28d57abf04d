// src/models/quiz.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::question::{PublicQuestion, Question, QuestionInput, validate_questions};

/// Represents the 'quizzes' table.
///
/// `total_score` and `attempt_count` are aggregates over finalized attempts.
/// They only ever grow, and only through the store's atomic increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: Uuid,
    pub owner_id: i64,
    pub title: String,
    pub questions: Vec<Question>,
    pub time_limit_minutes: i32,
    pub date_opens: DateTime<Utc>,
    pub date_closes: DateTime<Utc>,
    pub total_score: i64,
    pub attempt_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    pub fn time_limit(&self) -> Duration {
        Duration::minutes(i64::from(self.time_limit_minutes))
    }

    /// Whether a new attempt may be started at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.date_opens <= now && now < self.date_closes
    }

    /// Deadline of an attempt started at `start`: the earlier of the
    /// quiz close time and `start + time limit`.
    pub fn deadline_for(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        std::cmp::min(self.date_closes, start + self.time_limit())
    }
}

/// Participant-facing view of a quiz (no correct answers).
#[derive(Debug, Serialize)]
pub struct PublicQuiz {
    pub id: Uuid,
    pub owner_id: i64,
    pub title: String,
    pub questions: Vec<PublicQuestion>,
    pub time_limit_minutes: i32,
    pub date_opens: DateTime<Utc>,
    pub date_closes: DateTime<Utc>,
    pub attempt_count: i64,
}

impl From<&Quiz> for PublicQuiz {
    fn from(quiz: &Quiz) -> Self {
        PublicQuiz {
            id: quiz.id,
            owner_id: quiz.owner_id,
            title: quiz.title.clone(),
            questions: quiz.questions.iter().map(PublicQuestion::from).collect(),
            time_limit_minutes: quiz.time_limit_minutes,
            date_opens: quiz.date_opens,
            date_closes: quiz.date_closes,
            attempt_count: quiz.attempt_count,
        }
    }
}

/// DTO for creating a new quiz.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(nested, custom(function = validate_questions))]
    pub questions: Vec<QuestionInput>,
    #[validate(range(min = 1, max = 1440))]
    pub time_limit_minutes: i32,
    pub date_opens: DateTime<Utc>,
    pub date_closes: DateTime<Utc>,
}

impl CreateQuizRequest {
    /// Runs field validation plus the open-window ordering check.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())?;
        if self.date_opens >= self.date_closes {
            return Err("date_opens must be before date_closes".to_string());
        }
        Ok(())
    }

    pub fn into_quiz(self, owner_id: i64) -> Quiz {
        Quiz {
            id: Uuid::new_v4(),
            owner_id,
            title: self.title,
            questions: self.questions.into_iter().map(Question::from).collect(),
            time_limit_minutes: self.time_limit_minutes,
            date_opens: self.date_opens,
            date_closes: self.date_closes,
            total_score: 0,
            attempt_count: 0,
            created_at: Utc::now(),
        }
    }
}
