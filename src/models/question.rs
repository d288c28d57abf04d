// src/models/question.rs

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Kind of question. Both kinds are graded by exact string equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    ShortAnswer,
}

/// A question embedded in a quiz.
/// Stored as part of the quiz's `questions` JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Unique within the owning quiz.
    pub id: String,

    #[serde(rename = "type")]
    pub question_type: QuestionType,

    /// The text shown to participants.
    pub content: String,

    /// Only populated for multiple-choice questions.
    #[serde(default)]
    pub options: Vec<String>,

    /// Compared case-sensitively against the participant's answer.
    pub correct_answer: String,
}

/// DTO for sending a question to participants (excludes the correct answer).
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub content: String,
    pub options: Vec<String>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        PublicQuestion {
            id: q.id.clone(),
            question_type: q.question_type,
            content: q.content.clone(),
            options: q.options.clone(),
        }
    }
}

/// DTO for a question inside a create-quiz request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuestionInput {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[validate(length(min = 1, max = 1000))]
    pub content: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[validate(length(min = 1, max = 500))]
    pub correct_answer: String,
}

impl From<QuestionInput> for Question {
    fn from(input: QuestionInput) -> Self {
        Question {
            id: input.id,
            question_type: input.question_type,
            content: input.content,
            options: input.options,
            correct_answer: input.correct_answer,
        }
    }
}

/// Cross-question checks the derive cannot express:
/// unique ids, and well-formed multiple-choice options.
pub fn validate_questions(questions: &[QuestionInput]) -> Result<(), ValidationError> {
    if questions.is_empty() {
        return Err(ValidationError::new("questions_cannot_be_empty"));
    }

    let mut seen = HashSet::new();
    for q in questions {
        if !seen.insert(q.id.as_str()) {
            return Err(ValidationError::new("duplicate_question_id"));
        }
        match q.question_type {
            QuestionType::MultipleChoice => {
                if q.options.len() < 2 {
                    return Err(ValidationError::new("multiple_choice_needs_two_options"));
                }
                if q.options.iter().any(|opt| opt.is_empty() || opt.len() > 500) {
                    return Err(ValidationError::new("invalid_option"));
                }
                if !q.options.contains(&q.correct_answer) {
                    return Err(ValidationError::new("correct_answer_not_an_option"));
                }
            }
            QuestionType::ShortAnswer => {
                if !q.options.is_empty() {
                    return Err(ValidationError::new("short_answer_has_no_options"));
                }
            }
        }
    }
    Ok(())
}
