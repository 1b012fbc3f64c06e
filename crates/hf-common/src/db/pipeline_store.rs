use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::Row;
use tracing::instrument;

use crate::db::PgPool;
use crate::db::util::TimedClientExt;
use crate::model::{
    AssessmentQuestion, CandidateStatus, EmailStatus, EventDraft, EventStatus, Invitation,
    InterviewResponse, NewInvitation, PipelineRecord, RecordContext, Stage, StageEvent,
};
use crate::store::{PipelineStore, StageTransition, StoreError, TransitionOutcome};

const RECORD_COLUMNS: &str = "c.id, c.job_id, c.candidate_id, c.current_stage_id, c.ai_score, \
     c.ai_analysis, c.status, c.resume_url, c.applied_at, c.updated_at";

const EVENT_COLUMNS: &str = "e.id, e.pipeline_record_id, e.stage_id, e.status, e.ai_score, \
     e.ai_feedback, e.notes, e.scheduled_at, e.completed_at";

const INVITATION_COLUMNS: &str =
    "id, stage_event_id, token, expires_at, used_at, email_status, created_at";

const RESPONSE_COLUMNS: &str =
    "id, stage_event_id, questions, answers, correct_answers, score, started_at, completed_at";

const UPSERT_EVENT_SQL: &str = "INSERT INTO interview_events AS e (
        pipeline_record_id, stage_id, status, ai_score, ai_feedback, notes, scheduled_at, completed_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (pipeline_record_id, stage_id) DO UPDATE SET
        status = EXCLUDED.status,
        ai_score = EXCLUDED.ai_score,
        ai_feedback = EXCLUDED.ai_feedback,
        notes = COALESCE(EXCLUDED.notes, e.notes),
        scheduled_at = COALESCE(EXCLUDED.scheduled_at, e.scheduled_at),
        completed_at = EXCLUDED.completed_at
    RETURNING e.id, e.pipeline_record_id, e.stage_id, e.status, e.ai_score,
        e.ai_feedback, e.notes, e.scheduled_at, e.completed_at";

fn map_record(row: &Row) -> Result<PipelineRecord, StoreError> {
    let status: String = row.get("status");
    Ok(PipelineRecord {
        id: row.get("id"),
        job_id: row.get("job_id"),
        candidate_id: row.get("candidate_id"),
        current_stage_id: row.get("current_stage_id"),
        ai_score: row.get("ai_score"),
        ai_analysis: row.get("ai_analysis"),
        status: CandidateStatus::parse(&status)
            .ok_or_else(|| StoreError::Mapping(format!("unknown candidate status: {status}")))?,
        resume_url: row.get("resume_url"),
        applied_at: row.get("applied_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_event(row: &Row) -> Result<StageEvent, StoreError> {
    let status: String = row.get("status");
    Ok(StageEvent {
        id: row.get("id"),
        pipeline_record_id: row.get("pipeline_record_id"),
        stage_id: row.get("stage_id"),
        status: EventStatus::parse(&status)
            .ok_or_else(|| StoreError::Mapping(format!("unknown event status: {status}")))?,
        ai_score: row.get("ai_score"),
        ai_feedback: row.get("ai_feedback"),
        notes: row.get("notes"),
        scheduled_at: row.get("scheduled_at"),
        completed_at: row.get("completed_at"),
    })
}

fn map_invitation(row: &Row) -> Result<Invitation, StoreError> {
    let email_status: String = row.get("email_status");
    Ok(Invitation {
        id: row.get("id"),
        stage_event_id: row.get("stage_event_id"),
        token: row.get("token"),
        expires_at: row.get("expires_at"),
        used_at: row.get("used_at"),
        email_status: EmailStatus::parse(&email_status).ok_or_else(|| {
            StoreError::Mapping(format!("unknown email status: {email_status}"))
        })?,
        created_at: row.get("created_at"),
    })
}

fn map_response(row: &Row) -> Result<InterviewResponse, StoreError> {
    let questions: Value = row.get("questions");
    let answers: Value = row.get("answers");
    Ok(InterviewResponse {
        id: row.get("id"),
        stage_event_id: row.get("stage_event_id"),
        questions: serde_json::from_value(questions)
            .map_err(|err| StoreError::Mapping(format!("invalid questions payload: {err}")))?,
        answers: serde_json::from_value(answers)
            .map_err(|err| StoreError::Mapping(format!("invalid answers payload: {err}")))?,
        correct_answers: row.get("correct_answers"),
        score: row.get("score"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|err| StoreError::Mapping(err.to_string()))
}

/// Postgres-backed pipeline storage.
#[derive(Clone)]
pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_stages(&self) -> Result<Vec<Stage>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .timed_query_cached(
                "SELECT id, name, stage_order, is_ai_automated
                 FROM interview_stages
                 ORDER BY stage_order ASC",
                &[],
                "list_stages",
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| Stage {
                id: row.get("id"),
                name: row.get("name"),
                order: row.get("stage_order"),
                is_ai_automated: row.get("is_ai_automated"),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn record_context(&self, record_id: i64) -> Result<Option<RecordContext>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS},
                    COALESCE(p.full_name, 'Candidate') AS candidate_name,
                    p.email AS candidate_email,
                    COALESCE(j.title, 'Position') AS job_title
             FROM interview_candidates c
             LEFT JOIN profiles p ON p.id = c.candidate_id
             LEFT JOIN jobs j ON j.id = c.job_id
             WHERE c.id = $1"
        );

        let Some(row) = client
            .timed_query_opt_cached(&sql, &[&record_id], "record_context")
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(RecordContext {
            record: map_record(&row)?,
            candidate_name: row.get("candidate_name"),
            candidate_email: row.get("candidate_email"),
            job_title: row.get("job_title"),
        }))
    }

    #[instrument(skip(self))]
    async fn list_active_records(&self, job_id: i64) -> Result<Vec<PipelineRecord>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS}
             FROM interview_candidates c
             WHERE c.job_id = $1 AND c.status = 'active'
             ORDER BY c.applied_at ASC, c.id ASC"
        );
        let rows = client
            .timed_query_cached(&sql, &[&job_id], "list_active_records")
            .await?;
        rows.iter().map(map_record).collect()
    }

    #[instrument(skip(self))]
    async fn list_awaiting_auto_progress(
        &self,
        limit: i64,
        exclude: &[i64],
    ) -> Result<Vec<i64>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .timed_query_cached(
                "SELECT c.id
                 FROM interview_candidates c
                 JOIN interview_stages s ON s.id = COALESCE(
                     c.current_stage_id,
                     (SELECT id FROM interview_stages ORDER BY stage_order ASC LIMIT 1)
                 )
                 WHERE c.status = 'active'
                   AND s.is_ai_automated
                   AND NOT EXISTS (
                       SELECT 1 FROM interview_events e
                       WHERE e.pipeline_record_id = c.id
                         AND e.stage_id = s.id
                         AND e.status <> 'pending'
                   )
                   AND c.id <> ALL($2)
                 ORDER BY c.updated_at ASC, c.id ASC
                 LIMIT $1",
                &[&limit, &exclude],
                "list_awaiting_auto_progress",
            )
            .await?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    #[instrument(skip(self))]
    async fn list_events_for_job(&self, job_id: i64) -> Result<Vec<StageEvent>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS}
             FROM interview_events e
             JOIN interview_candidates c ON c.id = e.pipeline_record_id
             WHERE c.job_id = $1
             ORDER BY e.id ASC"
        );
        let rows = client
            .timed_query_cached(&sql, &[&job_id], "list_events_for_job")
            .await?;
        rows.iter().map(map_event).collect()
    }

    #[instrument(skip(self))]
    async fn list_events_for_record(
        &self,
        record_id: i64,
    ) -> Result<Vec<StageEvent>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS}
             FROM interview_events e
             WHERE e.pipeline_record_id = $1
             ORDER BY e.id ASC"
        );
        let rows = client
            .timed_query_cached(&sql, &[&record_id], "list_events_for_record")
            .await?;
        rows.iter().map(map_event).collect()
    }

    async fn get_event(&self, event_id: i64) -> Result<Option<StageEvent>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM interview_events e WHERE e.id = $1");
        client
            .timed_query_opt_cached(&sql, &[&event_id], "get_event")
            .await?
            .as_ref()
            .map(map_event)
            .transpose()
    }

    #[instrument(skip(self, draft), fields(record_id = draft.pipeline_record_id, stage_id = draft.stage_id))]
    async fn upsert_event(&self, draft: &EventDraft) -> Result<StageEvent, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .timed_query_one_cached(
                UPSERT_EVENT_SQL,
                &[
                    &draft.pipeline_record_id,
                    &draft.stage_id,
                    &draft.status.as_str(),
                    &draft.ai_score,
                    &draft.ai_feedback,
                    &draft.notes,
                    &draft.scheduled_at,
                    &draft.completed_at,
                ],
                "upsert_event",
            )
            .await?;
        map_event(&row)
    }

    #[instrument(skip(self, transition), fields(record_id = transition.record_id, stage_id = transition.event.stage_id))]
    async fn apply_transition(
        &self,
        transition: &StageTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM interview_candidates c WHERE c.id = $1 FOR UPDATE"
        );
        let row = tx
            .timed_query_opt_cached(&sql, &[&transition.record_id], "lock_record")
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("pipeline record {}", transition.record_id)))?;
        let record = map_record(&row)?;

        if !record.is_active() || record.current_stage_id != transition.expected_stage_id {
            tx.rollback().await?;
            return Ok(TransitionOutcome::Stale { record });
        }

        if let Some(completion) = &transition.completion {
            let answers = to_json(&completion.answers)?;
            let finalized = tx
                .timed_execute_cached(
                    "UPDATE interview_responses SET
                        answers = $2,
                        correct_answers = $3,
                        score = $4,
                        completed_at = $5
                     WHERE id = $1 AND completed_at IS NULL",
                    &[
                        &completion.response_id,
                        &answers,
                        &completion.correct_answers,
                        &completion.score,
                        &completion.completed_at,
                    ],
                    "complete_response",
                )
                .await?;
            if finalized == 0 {
                tx.rollback().await?;
                return Ok(TransitionOutcome::Stale { record });
            }
        }

        let event_row = tx
            .timed_query_one_cached(
                UPSERT_EVENT_SQL,
                &[
                    &transition.event.pipeline_record_id,
                    &transition.event.stage_id,
                    &transition.event.status.as_str(),
                    &transition.event.ai_score,
                    &transition.event.ai_feedback,
                    &transition.event.notes,
                    &transition.event.scheduled_at,
                    &transition.event.completed_at,
                ],
                "upsert_event",
            )
            .await?;
        let event = map_event(&event_row)?;

        let next_stage_id = transition
            .next_stage_id
            .or(record.current_stage_id)
            .unwrap_or(transition.event.stage_id);

        let update_sql = format!(
            "UPDATE interview_candidates c SET
                current_stage_id = $2,
                status = $3,
                ai_score = COALESCE($4, c.ai_score),
                ai_analysis = COALESCE($5, c.ai_analysis),
                updated_at = NOW()
             WHERE c.id = $1
             RETURNING {RECORD_COLUMNS}"
        );
        let updated_row = tx
            .timed_query_one_cached(
                &update_sql,
                &[
                    &transition.record_id,
                    &next_stage_id,
                    &transition.status.as_str(),
                    &transition.ai_score,
                    &transition.ai_analysis,
                ],
                "update_record",
            )
            .await?;
        let updated = map_record(&updated_row)?;

        tx.commit().await?;

        Ok(TransitionOutcome::Applied {
            record: updated,
            event,
        })
    }

    #[instrument(skip(self, invitation), fields(stage_event_id = invitation.stage_event_id))]
    async fn create_invitation(
        &self,
        invitation: &NewInvitation,
    ) -> Result<Invitation, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO interview_invitations (stage_event_id, token, expires_at)
             VALUES ($1, $2, $3)
             RETURNING {INVITATION_COLUMNS}"
        );
        let row = client
            .timed_query_one_cached(
                &sql,
                &[
                    &invitation.stage_event_id,
                    &invitation.token,
                    &invitation.expires_at,
                ],
                "create_invitation",
            )
            .await?;
        map_invitation(&row)
    }

    async fn find_invitation(&self, token: &str) -> Result<Option<Invitation>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM interview_invitations WHERE token = $1");
        client
            .timed_query_opt_cached(&sql, &[&token], "find_invitation")
            .await?
            .as_ref()
            .map(map_invitation)
            .transpose()
    }

    async fn mark_invitation_used(
        &self,
        invitation_id: i64,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .timed_execute_cached(
                "UPDATE interview_invitations
                 SET used_at = COALESCE(used_at, $2)
                 WHERE id = $1",
                &[&invitation_id, &used_at],
                "mark_invitation_used",
            )
            .await?;
        Ok(())
    }

    async fn set_email_status(
        &self,
        invitation_id: i64,
        status: EmailStatus,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .timed_execute_cached(
                "UPDATE interview_invitations SET email_status = $2 WHERE id = $1",
                &[&invitation_id, &status.as_str()],
                "set_email_status",
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, questions))]
    async fn create_response(
        &self,
        stage_event_id: i64,
        questions: &[AssessmentQuestion],
    ) -> Result<InterviewResponse, StoreError> {
        let client = self.pool.get().await?;
        let questions = to_json(&questions)?;
        let sql = format!(
            "INSERT INTO interview_responses (stage_event_id, questions)
             VALUES ($1, $2)
             RETURNING {RESPONSE_COLUMNS}"
        );
        let row = client
            .timed_query_one_cached(&sql, &[&stage_event_id, &questions], "create_response")
            .await?;
        map_response(&row)
    }

    async fn get_response(
        &self,
        response_id: i64,
    ) -> Result<Option<InterviewResponse>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {RESPONSE_COLUMNS} FROM interview_responses WHERE id = $1");
        client
            .timed_query_opt_cached(&sql, &[&response_id], "get_response")
            .await?
            .as_ref()
            .map(map_response)
            .transpose()
    }

    async fn find_response_for_event(
        &self,
        stage_event_id: i64,
    ) -> Result<Option<InterviewResponse>, StoreError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {RESPONSE_COLUMNS} FROM interview_responses
             WHERE stage_event_id = $1
             ORDER BY id DESC
             LIMIT 1"
        );
        client
            .timed_query_opt_cached(&sql, &[&stage_event_id], "find_response_for_event")
            .await?
            .as_ref()
            .map(map_response)
            .transpose()
    }
}
