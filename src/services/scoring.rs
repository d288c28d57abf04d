// src/services/scoring.rs

use crate::models::{attempt::Answers, quiz::Quiz};

/// Computes the score of an answer set against a quiz.
///
/// One point per question whose answer equals `correct_answer` exactly
/// (case-sensitive, no trimming). Unanswered questions score zero and
/// answers for unknown question ids are ignored, so the result is always
/// within `0..=quiz.questions.len()`.
pub fn score(answers: &Answers, quiz: &Quiz) -> i64 {
    let correct = quiz
        .questions
        .iter()
        .filter(|q| answers.get(&q.id).is_some_and(|ans| ans == &q.correct_answer))
        .count();

    correct as i64
}
