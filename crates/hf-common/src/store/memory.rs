use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{PipelineStore, StageTransition, StoreError, TransitionOutcome};
use crate::model::{
    AssessmentQuestion, EmailStatus, EventDraft, EventStatus, Invitation, InterviewResponse,
    NewInvitation, PipelineRecord, RecordContext, Stage, StageCatalog, StageEvent,
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    stages: Vec<Stage>,
    jobs: HashMap<i64, String>,
    profiles: HashMap<i64, (String, Option<String>)>,
    records: BTreeMap<i64, PipelineRecord>,
    events: BTreeMap<i64, StageEvent>,
    invitations: BTreeMap<i64, Invitation>,
    responses: BTreeMap<i64, InterviewResponse>,
}

impl Inner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn upsert_event(&mut self, draft: &EventDraft) -> StageEvent {
        let existing = self
            .events
            .values()
            .find(|event| {
                event.pipeline_record_id == draft.pipeline_record_id
                    && event.stage_id == draft.stage_id
            })
            .map(|event| event.id);

        let id = match existing {
            Some(id) => id,
            None => self.allocate_id(),
        };

        let previous = self.events.get(&id);
        let event = StageEvent {
            id,
            pipeline_record_id: draft.pipeline_record_id,
            stage_id: draft.stage_id,
            status: draft.status,
            ai_score: draft.ai_score,
            ai_feedback: draft.ai_feedback.clone(),
            notes: draft
                .notes
                .clone()
                .or_else(|| previous.and_then(|p| p.notes.clone())),
            scheduled_at: draft
                .scheduled_at
                .or_else(|| previous.and_then(|p| p.scheduled_at)),
            completed_at: draft.completed_at,
        };
        self.events.insert(id, event.clone());
        event
    }
}

/// Process-local store with the same semantics as the postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(stages: Vec<Stage>) -> Self {
        let inner = Inner {
            next_id: stages.iter().map(|s| s.id).max().unwrap_or(0),
            stages,
            ..Default::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// The catalog seeded by the database migrations.
    pub fn with_default_catalog() -> Self {
        Self::new(default_stages())
    }

    pub async fn insert_job(&self, title: &str) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = inner.allocate_id();
        inner.jobs.insert(id, title.to_string());
        id
    }

    pub async fn insert_profile(&self, full_name: &str, email: Option<&str>) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = inner.allocate_id();
        inner
            .profiles
            .insert(id, (full_name.to_string(), email.map(str::to_string)));
        id
    }

    /// Creates an active record at the implicit first stage.
    pub async fn insert_record(&self, job_id: i64, candidate_id: i64) -> PipelineRecord {
        let mut inner = self.inner.lock().await;
        let id = inner.allocate_id();
        let record = PipelineRecord::new(id, job_id, candidate_id);
        inner.records.insert(id, record.clone());
        record
    }

    pub async fn put_record(&self, record: PipelineRecord) {
        self.inner.lock().await.records.insert(record.id, record);
    }

    pub async fn record(&self, record_id: i64) -> Option<PipelineRecord> {
        self.inner.lock().await.records.get(&record_id).cloned()
    }

    pub async fn invitations(&self) -> Vec<Invitation> {
        self.inner.lock().await.invitations.values().cloned().collect()
    }

    pub async fn responses(&self) -> Vec<InterviewResponse> {
        self.inner.lock().await.responses.values().cloned().collect()
    }
}

pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new(1, "Resume Screening", 1, true),
        Stage::new(2, "AI Phone Interview", 2, true),
        Stage::new(3, "Technical Assessment", 3, false),
        Stage::new(4, "HR Round", 4, false),
        Stage::new(5, "Viva", 5, false),
        Stage::new(6, "Final Review", 6, false),
        Stage::new(7, "Offer Stage", 7, false),
    ]
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_stages(&self) -> Result<Vec<Stage>, StoreError> {
        let mut stages = self.inner.lock().await.stages.clone();
        stages.sort_by_key(|stage| stage.order);
        Ok(stages)
    }

    async fn record_context(&self, record_id: i64) -> Result<Option<RecordContext>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(record) = inner.records.get(&record_id) else {
            return Ok(None);
        };

        let (candidate_name, candidate_email) = inner
            .profiles
            .get(&record.candidate_id)
            .cloned()
            .unwrap_or_else(|| ("Candidate".to_string(), None));
        let job_title = inner
            .jobs
            .get(&record.job_id)
            .cloned()
            .unwrap_or_else(|| "Position".to_string());

        Ok(Some(RecordContext {
            record: record.clone(),
            candidate_name,
            candidate_email,
            job_title,
        }))
    }

    async fn list_active_records(&self, job_id: i64) -> Result<Vec<PipelineRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|record| record.job_id == job_id && record.is_active())
            .cloned()
            .collect())
    }

    async fn list_awaiting_auto_progress(
        &self,
        limit: i64,
        exclude: &[i64],
    ) -> Result<Vec<i64>, StoreError> {
        let inner = self.inner.lock().await;
        let catalog = StageCatalog::new(inner.stages.clone());

        let mut waiting: Vec<&PipelineRecord> = inner
            .records
            .values()
            .filter(|record| record.is_active() && !exclude.contains(&record.id))
            .filter(|record| {
                let Some(stage) = catalog.current(record.current_stage_id) else {
                    return false;
                };
                stage.is_ai_automated
                    && !inner.events.values().any(|event| {
                        event.pipeline_record_id == record.id
                            && event.stage_id == stage.id
                            && event.status != EventStatus::Pending
                    })
            })
            .collect();
        waiting.sort_by_key(|record| (record.updated_at, record.id));

        Ok(waiting
            .into_iter()
            .take(usize::try_from(limit.max(0)).unwrap_or(0))
            .map(|record| record.id)
            .collect())
    }

    async fn list_events_for_job(&self, job_id: i64) -> Result<Vec<StageEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .values()
            .filter(|event| {
                inner
                    .records
                    .get(&event.pipeline_record_id)
                    .is_some_and(|record| record.job_id == job_id)
            })
            .cloned()
            .collect())
    }

    async fn list_events_for_record(
        &self,
        record_id: i64,
    ) -> Result<Vec<StageEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .values()
            .filter(|event| event.pipeline_record_id == record_id)
            .cloned()
            .collect())
    }

    async fn get_event(&self, event_id: i64) -> Result<Option<StageEvent>, StoreError> {
        Ok(self.inner.lock().await.events.get(&event_id).cloned())
    }

    async fn upsert_event(&self, draft: &EventDraft) -> Result<StageEvent, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.records.contains_key(&draft.pipeline_record_id) {
            return Err(StoreError::NotFound(format!(
                "pipeline record {}",
                draft.pipeline_record_id
            )));
        }
        Ok(inner.upsert_event(draft))
    }

    async fn apply_transition(
        &self,
        transition: &StageTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get(&transition.record_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("pipeline record {}", transition.record_id))
            })?;

        if !record.is_active() || record.current_stage_id != transition.expected_stage_id {
            return Ok(TransitionOutcome::Stale { record });
        }

        if let Some(completion) = &transition.completion {
            let response = inner
                .responses
                .get_mut(&completion.response_id)
                .ok_or_else(|| {
                    StoreError::NotFound(format!("interview response {}", completion.response_id))
                })?;
            if response.completed_at.is_some() {
                return Ok(TransitionOutcome::Stale { record });
            }
            response.answers = completion.answers.clone();
            response.correct_answers = Some(completion.correct_answers);
            response.score = Some(completion.score);
            response.completed_at = Some(completion.completed_at);
        }

        let event = inner.upsert_event(&transition.event);

        let mut updated = record;
        if let Some(next_stage_id) = transition.next_stage_id {
            updated.current_stage_id = Some(next_stage_id);
        } else if updated.current_stage_id.is_none() {
            updated.current_stage_id = Some(transition.event.stage_id);
        }
        updated.status = transition.status;
        if transition.ai_score.is_some() {
            updated.ai_score = transition.ai_score;
        }
        if transition.ai_analysis.is_some() {
            updated.ai_analysis = transition.ai_analysis.clone();
        }
        updated.updated_at = Utc::now();
        inner.records.insert(updated.id, updated.clone());

        Ok(TransitionOutcome::Applied {
            record: updated,
            event,
        })
    }

    async fn create_invitation(
        &self,
        invitation: &NewInvitation,
    ) -> Result<Invitation, StoreError> {
        let mut inner = self.inner.lock().await;
        let id = inner.allocate_id();
        let created = Invitation {
            id,
            stage_event_id: invitation.stage_event_id,
            token: invitation.token.clone(),
            expires_at: invitation.expires_at,
            used_at: None,
            email_status: EmailStatus::Pending,
            created_at: Utc::now(),
        };
        inner.invitations.insert(id, created.clone());
        Ok(created)
    }

    async fn find_invitation(&self, token: &str) -> Result<Option<Invitation>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .invitations
            .values()
            .find(|invitation| invitation.token == token)
            .cloned())
    }

    async fn mark_invitation_used(
        &self,
        invitation_id: i64,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(invitation) = inner.invitations.get_mut(&invitation_id) {
            invitation.used_at.get_or_insert(used_at);
        }
        Ok(())
    }

    async fn set_email_status(
        &self,
        invitation_id: i64,
        status: EmailStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(invitation) = inner.invitations.get_mut(&invitation_id) {
            invitation.email_status = status;
        }
        Ok(())
    }

    async fn create_response(
        &self,
        stage_event_id: i64,
        questions: &[AssessmentQuestion],
    ) -> Result<InterviewResponse, StoreError> {
        let mut inner = self.inner.lock().await;
        let id = inner.allocate_id();
        let response = InterviewResponse {
            id,
            stage_event_id,
            questions: questions.to_vec(),
            answers: Vec::new(),
            correct_answers: None,
            score: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        inner.responses.insert(id, response.clone());
        Ok(response)
    }

    async fn get_response(
        &self,
        response_id: i64,
    ) -> Result<Option<InterviewResponse>, StoreError> {
        Ok(self.inner.lock().await.responses.get(&response_id).cloned())
    }

    async fn find_response_for_event(
        &self,
        stage_event_id: i64,
    ) -> Result<Option<InterviewResponse>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .responses
            .values()
            .rev()
            .find(|response| response.stage_event_id == stage_event_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateStatus, ResponseCompletion};

    #[tokio::test]
    async fn upsert_event_keeps_one_row_per_record_and_stage() {
        let store = MemoryStore::with_default_catalog();
        let job = store.insert_job("Backend Engineer").await;
        let profile = store.insert_profile("Ada", None).await;
        let record = store.insert_record(job, profile).await;

        let first = store
            .upsert_event(&EventDraft::scheduled(record.id, 1))
            .await
            .unwrap();
        let second = store
            .upsert_event(&EventDraft::new(record.id, 1, EventStatus::Passed).with_score(80.0))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, EventStatus::Passed);
        assert!(second.scheduled_at.is_some());
        assert_eq!(store.list_events_for_record(record.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_transition_is_not_applied() {
        let store = MemoryStore::with_default_catalog();
        let record = store.insert_record(1, 2).await;

        let transition = StageTransition {
            record_id: record.id,
            expected_stage_id: Some(2),
            event: EventDraft::new(record.id, 2, EventStatus::Passed),
            next_stage_id: Some(3),
            status: CandidateStatus::Active,
            ai_score: Some(90.0),
            ai_analysis: None,
            completion: None,
        };

        let outcome = store.apply_transition(&transition).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Stale { .. }));
        assert!(store.list_events_for_record(record.id).await.unwrap().is_empty());
    }

    fn graded(record_id: i64, response_id: i64, expected_stage_id: Option<i64>) -> StageTransition {
        StageTransition {
            record_id,
            expected_stage_id,
            event: EventDraft::new(record_id, 1, EventStatus::Passed).with_score(80.0),
            next_stage_id: Some(2),
            status: CandidateStatus::Active,
            ai_score: Some(80.0),
            ai_analysis: None,
            completion: Some(ResponseCompletion {
                response_id,
                answers: vec!["b".into()],
                correct_answers: 4,
                score: 80.0,
                completed_at: Utc::now(),
            }),
        }
    }

    #[tokio::test]
    async fn transition_finalizes_response_exactly_once() {
        let store = MemoryStore::with_default_catalog();
        let record = store.insert_record(1, 2).await;
        let event = store
            .upsert_event(&EventDraft::scheduled(record.id, 1))
            .await
            .unwrap();
        let response = store.create_response(event.id, &[]).await.unwrap();

        let first = store
            .apply_transition(&graded(record.id, response.id, None))
            .await
            .unwrap();
        assert!(matches!(first, TransitionOutcome::Applied { .. }));
        let stored = store.get_response(response.id).await.unwrap().unwrap();
        assert!(stored.is_completed());
        assert_eq!(stored.score, Some(80.0));
        assert_eq!(stored.answers, vec!["b".to_string()]);

        let mut back = store.record(record.id).await.unwrap();
        back.current_stage_id = None;
        store.put_record(back).await;
        let second = store
            .apply_transition(&graded(record.id, response.id, None))
            .await
            .unwrap();
        assert!(matches!(second, TransitionOutcome::Stale { .. }));
    }

    #[tokio::test]
    async fn stale_transition_leaves_response_open() {
        let store = MemoryStore::with_default_catalog();
        let record = store.insert_record(1, 2).await;
        let event = store
            .upsert_event(&EventDraft::scheduled(record.id, 1))
            .await
            .unwrap();
        let response = store.create_response(event.id, &[]).await.unwrap();

        let outcome = store
            .apply_transition(&graded(record.id, response.id, Some(3)))
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Stale { .. }));
        let stored = store.get_response(response.id).await.unwrap().unwrap();
        assert!(!stored.is_completed());
        assert_eq!(
            store.get_event(event.id).await.unwrap().unwrap().status,
            EventStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn awaiting_auto_progress_skips_manual_evaluated_and_invited_stages() {
        let store = MemoryStore::with_default_catalog();
        let fresh = store.insert_record(1, 2).await;

        let mut manual = store.insert_record(1, 3).await;
        manual.current_stage_id = Some(3);
        store.put_record(manual).await;

        let evaluated = store.insert_record(1, 4).await;
        store
            .upsert_event(&EventDraft::new(evaluated.id, 1, EventStatus::Failed))
            .await
            .unwrap();

        let invited = store.insert_record(1, 5).await;
        store
            .upsert_event(&EventDraft::scheduled(invited.id, 1))
            .await
            .unwrap();

        let waiting = store.list_awaiting_auto_progress(10, &[]).await.unwrap();
        assert_eq!(waiting, vec![fresh.id]);
    }

    #[tokio::test]
    async fn excluded_records_do_not_consume_the_limit() {
        let store = MemoryStore::with_default_catalog();
        let first = store.insert_record(1, 2).await;
        let second = store.insert_record(1, 3).await;

        assert_eq!(
            store.list_awaiting_auto_progress(1, &[]).await.unwrap(),
            vec![first.id]
        );
        assert_eq!(
            store.list_awaiting_auto_progress(1, &[first.id]).await.unwrap(),
            vec![second.id]
        );
        assert!(
            store
                .list_awaiting_auto_progress(1, &[first.id, second.id])
                .await
                .unwrap()
                .is_empty()
        );
    }
}
