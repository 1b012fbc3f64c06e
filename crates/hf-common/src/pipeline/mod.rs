//! Interview pipeline state machine.
//!
//! [`PipelineService`] owns every write to pipeline records: the auto-progress
//! walk, employer stage actions and candidate assessments. Each step is one
//! [`StageTransition`] committed through the store, followed by best-effort
//! candidate notification and a change-feed publish for board subscribers.

pub mod assessment;
pub mod board;
pub mod dispatch;
pub mod engine;
pub mod evaluator;
pub mod feed;
pub mod transition;

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use crate::config::PipelineConfig;
use crate::llm::LlmError;
use crate::model::{
    CandidateStatus, EventDraft, PipelineRecord, RecordContext, Stage, StageCatalog, StageEvent,
};
use crate::notify::Mailer;
use crate::store::{PipelineStore, StageTransition, StoreError, TransitionOutcome};

pub use assessment::{
    FallbackOnlyGenerator, LlmQuestionGenerator, QuestionGenerator, QuestionRequest,
    StartedInterview, SubmittedInterview,
};
pub use board::{PipelineBoard, StageProgress, build_board};
pub use dispatch::{DispatchReport, Dispatcher};
pub use engine::{HaltReason, ProgressReport};
pub use evaluator::{
    Evaluation, EvaluationInput, LlmStageEvaluator, ScriptedEvaluator, StageEvaluator,
};
pub use feed::{BoardSubscription, ChangeFeed, ChangeKind, PipelineChange, Refresh};
pub use transition::{ActionOutcome, StageAction, StageActionRequest};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Gone(String),
    #[error("{0}")]
    Conflict(String),
    #[error("pipeline misconfigured: {0}")]
    Misconfigured(String),
}

/// Where a committed step left the candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Advanced(Stage),
    Hired,
    Rejected,
}

impl Settlement {
    fn label(&self) -> &'static str {
        match self {
            Settlement::Advanced(_) => "advanced",
            Settlement::Hired => "hired",
            Settlement::Rejected => "rejected",
        }
    }
}

pub struct PipelineService {
    store: Arc<dyn PipelineStore>,
    evaluator: Arc<dyn StageEvaluator>,
    questions: Arc<dyn QuestionGenerator>,
    dispatcher: Dispatcher,
    feed: ChangeFeed,
    config: PipelineConfig,
}

impl PipelineService {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        evaluator: Arc<dyn StageEvaluator>,
        questions: Arc<dyn QuestionGenerator>,
        mailer: Arc<dyn Mailer>,
        config: PipelineConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            store.clone(),
            mailer,
            config.invitation_ttl,
            config.app_base_url.clone(),
        );
        Self {
            store,
            evaluator,
            questions,
            dispatcher,
            feed: ChangeFeed::default(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn subscribe(&self, job_id: i64) -> BoardSubscription {
        self.feed.subscribe(job_id)
    }

    #[instrument(skip(self))]
    pub async fn board(&self, job_id: i64) -> Result<PipelineBoard, PipelineError> {
        let catalog = self.catalog().await?;
        let records = self.store.list_active_records(job_id).await?;
        let events = self.store.list_events_for_job(job_id).await?;
        Ok(build_board(job_id, &catalog, &records, &events))
    }

    async fn catalog(&self) -> Result<StageCatalog, PipelineError> {
        let catalog = StageCatalog::new(self.store.list_stages().await?);
        if catalog.is_empty() {
            return Err(PipelineError::Misconfigured("stage catalog is empty".into()));
        }
        Ok(catalog)
    }

    async fn load(&self, record_id: i64) -> Result<(RecordContext, StageCatalog), PipelineError> {
        let ctx = self
            .store
            .record_context(record_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline record {record_id}")))?;
        let catalog = self.catalog().await?;
        Ok((ctx, catalog))
    }

    /// Commits one step; a stale record is a conflict.
    async fn commit(
        &self,
        transition: &StageTransition,
        settlement: &Settlement,
    ) -> Result<(PipelineRecord, StageEvent), PipelineError> {
        match self.store.apply_transition(transition).await? {
            TransitionOutcome::Applied { record, event } => {
                metrics::counter!("hf_stage_transitions_total", "outcome" => settlement.label())
                    .increment(1);
                info!(
                    record_id = record.id,
                    stage_id = event.stage_id,
                    score = ?event.ai_score,
                    outcome = settlement.label(),
                    "stage transition committed"
                );
                self.feed.publish(PipelineChange {
                    job_id: record.job_id,
                    record_id: record.id,
                    kind: ChangeKind::Transition,
                });
                Ok((record, event))
            }
            TransitionOutcome::Stale { record } => {
                metrics::counter!("hf_stage_transitions_total", "outcome" => "stale").increment(1);
                Err(PipelineError::Conflict(format!(
                    "pipeline record {} changed concurrently (status {}, stage {:?})",
                    record.id,
                    record.status.as_str(),
                    record.current_stage_id
                )))
            }
        }
    }

    /// Sends the notice that matches where the candidate ended up.
    async fn notify(
        &self,
        ctx: &RecordContext,
        record: &PipelineRecord,
        settlement: &Settlement,
    ) -> DispatchReport {
        let ctx = RecordContext {
            record: record.clone(),
            ..ctx.clone()
        };
        let report = match settlement {
            Settlement::Advanced(stage) => self.dispatcher.stage_reached(&ctx, stage).await,
            Settlement::Hired => self.dispatcher.decision(&ctx, true).await,
            Settlement::Rejected => self.dispatcher.decision(&ctx, false).await,
        };
        if report.invitation_id.is_some() {
            self.feed.publish(PipelineChange {
                job_id: record.job_id,
                record_id: record.id,
                kind: ChangeKind::Event,
            });
        }
        report
    }
}

fn ensure_active(record: &PipelineRecord) -> Result<(), PipelineError> {
    if record.is_active() {
        Ok(())
    } else {
        Err(PipelineError::Conflict(format!(
            "candidate is already {}",
            record.status.as_str()
        )))
    }
}

/// Plans the transition that closes `stage` with `passed`.
fn settle(
    record: &PipelineRecord,
    catalog: &StageCatalog,
    stage: &Stage,
    event: EventDraft,
    passed: bool,
) -> (StageTransition, Settlement) {
    let next = catalog.next_after(stage.id);
    let (next_stage_id, status, settlement) = match (passed, next) {
        (false, _) => (None, CandidateStatus::Rejected, Settlement::Rejected),
        (true, Some(next)) => (
            Some(next.id),
            CandidateStatus::Active,
            Settlement::Advanced(next.clone()),
        ),
        (true, None) => (None, CandidateStatus::Hired, Settlement::Hired),
    };
    let transition = StageTransition {
        record_id: record.id,
        expected_stage_id: record.current_stage_id,
        event,
        next_stage_id,
        status,
        ai_score: None,
        ai_analysis: None,
        completion: None,
    };
    (transition, settlement)
}

/// Adds this stage's entry to the record's accumulated analysis.
fn merge_analysis(previous: Option<&Value>, stage: &Stage, entry: Value) -> Value {
    let mut map = match previous {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("previous".into(), other.clone());
            map
        }
        None => Map::new(),
    };
    map.insert(stage.name.clone(), entry);
    Value::Object(map)
}

fn evaluation_entry(evaluation: &Evaluation) -> Value {
    json!({
        "score": evaluation.score,
        "passed": evaluation.passed,
        "feedback": evaluation.feedback,
        "observations": evaluation.observations,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::notify::RecordingMailer;
    use crate::store::MemoryStore;

    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub evaluator: Arc<ScriptedEvaluator>,
        pub mailer: Arc<RecordingMailer>,
        pub service: PipelineService,
        pub job_id: i64,
    }

    impl Harness {
        pub async fn new(scores: impl IntoIterator<Item = f64>) -> Self {
            Self::with_store(MemoryStore::with_default_catalog(), scores).await
        }

        pub async fn with_store(store: MemoryStore, scores: impl IntoIterator<Item = f64>) -> Self {
            let store = Arc::new(store);
            let evaluator = Arc::new(ScriptedEvaluator::new(scores));
            let mailer = Arc::new(RecordingMailer::new());
            let service = PipelineService::new(
                store.clone(),
                evaluator.clone(),
                Arc::new(FallbackOnlyGenerator),
                mailer.clone(),
                PipelineConfig::immediate(),
            );
            let job_id = store.insert_job("Platform Engineer").await;
            Self {
                store,
                evaluator,
                mailer,
                service,
                job_id,
            }
        }

        pub async fn candidate(&self, name: &str) -> PipelineRecord {
            let email = format!("{}@example.com", name.to_lowercase());
            let profile = self.store.insert_profile(name, Some(&email)).await;
            self.store.insert_record(self.job_id, profile).await
        }

        pub async fn candidate_at(&self, name: &str, stage_id: i64) -> PipelineRecord {
            let mut record = self.candidate(name).await;
            record.current_stage_id = Some(stage_id);
            self.store.put_record(record.clone()).await;
            record
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_accumulates_per_stage() {
        let screening = Stage::new(1, "Resume Screening", 1, true);
        let phone = Stage::new(2, "AI Phone Interview", 2, true);

        let first = merge_analysis(None, &screening, json!({ "score": 75 }));
        let second = merge_analysis(Some(&first), &phone, json!({ "score": 80 }));

        assert_eq!(second["Resume Screening"]["score"], 75);
        assert_eq!(second["AI Phone Interview"]["score"], 80);

        let legacy = merge_analysis(Some(&json!("free text")), &phone, json!({}));
        assert_eq!(legacy["previous"], "free text");
    }

    #[test]
    fn settle_picks_next_stage_hire_or_reject() {
        let catalog = StageCatalog::new(crate::store::memory::default_stages());
        let record = PipelineRecord::new(1, 1, 1);
        let first = catalog.first().cloned().unwrap();
        let last = catalog.stages().last().cloned().unwrap();
        let draft = EventDraft::new(1, first.id, crate::model::EventStatus::Passed);

        let (t, s) = settle(&record, &catalog, &first, draft.clone(), true);
        assert_eq!(t.next_stage_id, Some(2));
        assert_eq!(t.expected_stage_id, None);
        assert!(matches!(s, Settlement::Advanced(ref stage) if stage.id == 2));

        let (t, s) = settle(&record, &catalog, &last, draft.clone(), true);
        assert_eq!(t.status, CandidateStatus::Hired);
        assert_eq!(s, Settlement::Hired);

        let (t, s) = settle(&record, &catalog, &first, draft, false);
        assert_eq!(t.status, CandidateStatus::Rejected);
        assert_eq!(t.next_stage_id, None);
        assert_eq!(s, Settlement::Rejected);
    }
}
