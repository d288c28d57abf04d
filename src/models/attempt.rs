// src/models/attempt.rs

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::quiz::Quiz;

/// Attempt status. `Submitted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "submitted" => Ok(AttemptStatus::Submitted),
            other => Err(format!("unknown attempt status '{}'", other)),
        }
    }
}

/// One persisted answer. Attempts store answers as a list of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub question_id: String,
    pub selected_answer: String,
}

/// Question id -> selected answer. Absent key means unanswered.
pub type Answers = BTreeMap<String, String>;

/// Represents the 'attempts' table.
///
/// References its quiz by id only. `end_time` is fixed at creation.
/// `score` is `Some` exactly when `status` is `Submitted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub user_id: i64,
    pub quiz_id: Uuid,
    pub status: AttemptStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub score: Option<i64>,
    #[serde(with = "answer_list")]
    pub answers: Answers,
    /// Bumped on every answer write; used for compare-and-swap updates.
    pub version: i64,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Attempt {
    /// A fresh in-progress attempt on `quiz` starting at `now`.
    pub fn begin(user_id: i64, quiz: &Quiz, now: DateTime<Utc>) -> Self {
        Attempt {
            id: Uuid::new_v4(),
            user_id,
            quiz_id: quiz.id,
            status: AttemptStatus::InProgress,
            start_time: now,
            end_time: quiz.deadline_for(now),
            score: None,
            answers: Answers::new(),
            version: 0,
            submitted_at: None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.status == AttemptStatus::Submitted
    }

    pub fn answer_entries(&self) -> Vec<AnswerEntry> {
        to_entries(&self.answers)
    }
}

pub fn to_entries(answers: &Answers) -> Vec<AnswerEntry> {
    answers
        .iter()
        .map(|(question_id, selected_answer)| AnswerEntry {
            question_id: question_id.clone(),
            selected_answer: selected_answer.clone(),
        })
        .collect()
}

/// Later entries win when a list repeats a question id.
pub fn from_entries(entries: Vec<AnswerEntry>) -> Answers {
    entries
        .into_iter()
        .map(|e| (e.question_id, e.selected_answer))
        .collect()
}

/// Serializes `Answers` as `[{question_id, selected_answer}]`.
mod answer_list {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{AnswerEntry, Answers, from_entries, to_entries};

    pub fn serialize<S: Serializer>(answers: &Answers, serializer: S) -> Result<S::Ok, S::Error> {
        to_entries(answers).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Answers, D::Error> {
        Vec::<AnswerEntry>::deserialize(deserializer).map(from_entries)
    }
}

/// DTO for saving (or clearing, with an empty string) one answer.
#[derive(Debug, Deserialize)]
pub struct SaveAnswerRequest {
    pub question_id: String,
    #[serde(default)]
    pub selected_answer: String,
}

/// Response for a successful submit: the finalized attempt and the quiz
/// aggregates it was counted into.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub attempt: Attempt,
    pub quiz: QuizAggregates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuizAggregates {
    pub quiz_id: Uuid,
    pub total_score: i64,
    pub attempt_count: i64,
}

impl From<&Quiz> for QuizAggregates {
    fn from(quiz: &Quiz) -> Self {
        QuizAggregates {
            quiz_id: quiz.id,
            total_score: quiz.total_score,
            attempt_count: quiz.attempt_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_serialize_as_entry_list() {
        let mut answers = Answers::new();
        answers.insert("q2".to_string(), "B".to_string());
        answers.insert("q1".to_string(), "A".to_string());

        let json = serde_json::to_value(to_entries(&answers)).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"question_id": "q1", "selected_answer": "A"},
                {"question_id": "q2", "selected_answer": "B"}
            ])
        );
    }

    #[test]
    fn repeated_entries_keep_the_last_write() {
        let answers = from_entries(vec![
            AnswerEntry { question_id: "q1".into(), selected_answer: "A".into() },
            AnswerEntry { question_id: "q1".into(), selected_answer: "C".into() },
        ]);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers["q1"], "C");
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [AttemptStatus::InProgress, AttemptStatus::Submitted] {
            assert_eq!(status.as_str().parse::<AttemptStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<AttemptStatus>().is_err());
    }
}
