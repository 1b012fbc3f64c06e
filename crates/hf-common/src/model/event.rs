use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Passed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Scheduled => "scheduled",
            EventStatus::InProgress => "in_progress",
            EventStatus::Completed => "completed",
            EventStatus::Passed => "passed",
            EventStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(EventStatus::Pending),
            "scheduled" => Some(EventStatus::Scheduled),
            "in_progress" => Some(EventStatus::InProgress),
            "completed" => Some(EventStatus::Completed),
            "passed" => Some(EventStatus::Passed),
            "failed" => Some(EventStatus::Failed),
            _ => None,
        }
    }

    /// Whether the event records a final outcome for its stage.
    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::Passed | EventStatus::Failed
        )
    }
}

/// Outcome of a candidate at one stage (`interview_events`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub id: i64,
    pub pipeline_record_id: i64,
    pub stage_id: i64,
    pub status: EventStatus,
    pub ai_score: Option<f64>,
    pub ai_feedback: Option<Value>,
    pub notes: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Values written when an event is upserted for (record, stage).
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub pipeline_record_id: i64,
    pub stage_id: i64,
    pub status: EventStatus,
    pub ai_score: Option<f64>,
    pub ai_feedback: Option<Value>,
    pub notes: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EventDraft {
    pub fn new(pipeline_record_id: i64, stage_id: i64, status: EventStatus) -> Self {
        let completed_at = status.is_outcome().then(Utc::now);
        Self {
            pipeline_record_id,
            stage_id,
            status,
            ai_score: None,
            ai_feedback: None,
            notes: None,
            scheduled_at: None,
            completed_at,
        }
    }

    pub fn scheduled(pipeline_record_id: i64, stage_id: i64) -> Self {
        let mut draft = Self::new(pipeline_record_id, stage_id, EventStatus::Scheduled);
        draft.scheduled_at = Some(Utc::now());
        draft
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.ai_score = Some(score);
        self
    }

    pub fn with_feedback(mut self, feedback: Value) -> Self {
        self.ai_feedback = Some(feedback);
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}
