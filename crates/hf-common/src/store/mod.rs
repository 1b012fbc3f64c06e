//! Persistence seam for the interview pipeline.
//!
//! `PgPipelineStore` backs production; `MemoryStore` backs tests and local runs.
//! Every stage transition goes through [`PipelineStore::apply_transition`], which
//! writes the stage event, the record update and any finalized assessment
//! together and refuses to apply when the record is no longer active, has
//! moved off the expected stage, or the assessment was already submitted.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::db::db_error;
use crate::model::{
    AssessmentQuestion, CandidateStatus, EmailStatus, EventDraft, Invitation, InterviewResponse,
    NewInvitation, PipelineRecord, RecordContext, ResponseCompletion, Stage, StageEvent,
};

pub use memory::MemoryStore;

db_error!(StoreError {
    #[error("failed to map row: {0}")]
    Mapping(String),
    #[error("{0} not found")]
    NotFound(String),
});

/// One (record, stage) step: the event to upsert plus the record's new state.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTransition {
    pub record_id: i64,
    /// Raw `current_stage_id` the caller observed; the write is skipped if it changed.
    pub expected_stage_id: Option<i64>,
    pub event: EventDraft,
    pub next_stage_id: Option<i64>,
    pub status: CandidateStatus,
    pub ai_score: Option<f64>,
    pub ai_analysis: Option<Value>,
    /// Assessment response finalized by this step; must still be open.
    pub completion: Option<ResponseCompletion>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied {
        record: PipelineRecord,
        event: StageEvent,
    },
    /// The record was terminal, had already moved, or the response was
    /// already completed; nothing was written.
    Stale { record: PipelineRecord },
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn list_stages(&self) -> Result<Vec<Stage>, StoreError>;

    async fn record_context(&self, record_id: i64) -> Result<Option<RecordContext>, StoreError>;

    async fn list_active_records(&self, job_id: i64) -> Result<Vec<PipelineRecord>, StoreError>;

    /// Active records on an AI-automated stage with no event beyond `pending`.
    ///
    /// A scheduled or in-progress event means the candidate holds an invitation
    /// for that stage, so the assessment decides the outcome instead. Ids in
    /// `exclude` are filtered before the limit applies.
    async fn list_awaiting_auto_progress(
        &self,
        limit: i64,
        exclude: &[i64],
    ) -> Result<Vec<i64>, StoreError>;

    async fn list_events_for_job(&self, job_id: i64) -> Result<Vec<StageEvent>, StoreError>;

    async fn list_events_for_record(&self, record_id: i64)
    -> Result<Vec<StageEvent>, StoreError>;

    async fn get_event(&self, event_id: i64) -> Result<Option<StageEvent>, StoreError>;

    /// Inserts or replaces the event keyed by (pipeline_record_id, stage_id).
    async fn upsert_event(&self, draft: &EventDraft) -> Result<StageEvent, StoreError>;

    async fn apply_transition(
        &self,
        transition: &StageTransition,
    ) -> Result<TransitionOutcome, StoreError>;

    async fn create_invitation(&self, invitation: &NewInvitation)
    -> Result<Invitation, StoreError>;

    async fn find_invitation(&self, token: &str) -> Result<Option<Invitation>, StoreError>;

    async fn mark_invitation_used(
        &self,
        invitation_id: i64,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_email_status(
        &self,
        invitation_id: i64,
        status: EmailStatus,
    ) -> Result<(), StoreError>;

    async fn create_response(
        &self,
        stage_event_id: i64,
        questions: &[AssessmentQuestion],
    ) -> Result<InterviewResponse, StoreError>;

    async fn get_response(&self, response_id: i64)
    -> Result<Option<InterviewResponse>, StoreError>;

    async fn find_response_for_event(
        &self,
        stage_event_id: i64,
    ) -> Result<Option<InterviewResponse>, StoreError>;
}
