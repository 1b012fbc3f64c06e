use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Active,
    Rejected,
    Hired,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Active => "active",
            CandidateStatus::Rejected => "rejected",
            CandidateStatus::Hired => "hired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(CandidateStatus::Active),
            "rejected" => Some(CandidateStatus::Rejected),
            "hired" => Some(CandidateStatus::Hired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CandidateStatus::Active)
    }
}

/// A candidate's progress for one job application (`interview_candidates`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: i64,
    pub job_id: i64,
    pub candidate_id: i64,
    pub current_stage_id: Option<i64>,
    pub ai_score: Option<f64>,
    pub ai_analysis: Option<Value>,
    pub status: CandidateStatus,
    pub resume_url: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRecord {
    pub fn new(id: i64, job_id: i64, candidate_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_id,
            candidate_id,
            current_stage_id: None,
            ai_score: None,
            ai_analysis: None,
            status: CandidateStatus::Active,
            resume_url: None,
            applied_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CandidateStatus::Active
    }
}

/// A record joined with the profile and job rows it references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordContext {
    pub record: PipelineRecord,
    pub candidate_name: String,
    pub candidate_email: Option<String>,
    pub job_title: String,
}
