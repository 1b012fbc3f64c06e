use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A multiple-choice question as stored; `correct_answer` never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

impl AssessmentQuestion {
    pub fn new(question: &str, options: &[&str], correct_answer: &str) -> Self {
        Self {
            question: question.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct_answer: correct_answer.to_string(),
        }
    }

    /// A question is usable when it has a prompt, at least two distinct
    /// options, and its correct answer is one of them.
    pub fn is_well_formed(&self) -> bool {
        let mut options: Vec<&str> = self.options.iter().map(|o| o.trim()).collect();
        options.sort_unstable();
        options.dedup();

        !self.question.trim().is_empty()
            && options.len() >= 2
            && options.len() == self.options.len()
            && self.options.iter().any(|o| o == &self.correct_answer)
    }
}

/// The candidate-facing view of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub question: String,
    pub options: Vec<String>,
}

impl From<&AssessmentQuestion> for PublicQuestion {
    fn from(value: &AssessmentQuestion) -> Self {
        Self {
            question: value.question.clone(),
            options: value.options.clone(),
        }
    }
}

/// An assessment attempt (`interview_responses`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewResponse {
    pub id: i64,
    pub stage_event_id: i64,
    pub questions: Vec<AssessmentQuestion>,
    pub answers: Vec<String>,
    pub correct_answers: Option<i32>,
    pub score: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InterviewResponse {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Scored answers that finalize one response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCompletion {
    pub response_id: i64,
    pub answers: Vec<String>,
    pub correct_answers: i32,
    pub score: f64,
    pub completed_at: DateTime<Utc>,
}
