//! Employer-driven stage actions.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::instrument;

use super::{
    DispatchReport, Evaluation, EvaluationInput, PipelineError, PipelineService, Settlement,
    ensure_active, evaluation_entry, merge_analysis, settle,
};
use crate::model::{EventDraft, EventStatus, PipelineRecord, StageEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StageAction {
    Advance,
    Reject,
    Evaluate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageActionRequest {
    pub record_id: i64,
    pub action: StageAction,
    /// Stage the employer acted on; rejected with a conflict if the record moved.
    pub stage_id: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub action: StageAction,
    pub record: PipelineRecord,
    pub event: StageEvent,
    pub evaluation: Option<Evaluation>,
    pub next_stage: Option<String>,
    pub notification: Option<DispatchReport>,
    pub message: String,
}

impl PipelineService {
    /// Applies `advance`, `reject` or a single `evaluate` to the record's current stage.
    #[instrument(skip(self, request), fields(record_id = request.record_id, action = %request.action))]
    pub async fn stage_action(
        &self,
        request: StageActionRequest,
    ) -> Result<ActionOutcome, PipelineError> {
        let (ctx, catalog) = self.load(request.record_id).await?;
        let record = &ctx.record;
        ensure_active(record)?;

        let stage = catalog
            .current(record.current_stage_id)
            .cloned()
            .ok_or_else(|| {
                PipelineError::Misconfigured(format!(
                    "record {} points at unknown stage {:?}",
                    record.id, record.current_stage_id
                ))
            })?;
        if let Some(expected) = request.stage_id.filter(|id| *id != stage.id) {
            return Err(PipelineError::Conflict(format!(
                "candidate is at {} (stage {}), not stage {expected}",
                stage.name, stage.id
            )));
        }

        let notes = request
            .notes
            .map(|notes| notes.trim().to_string())
            .filter(|notes| !notes.is_empty());

        let (passed, evaluation) = match request.action {
            StageAction::Advance => (true, None),
            StageAction::Reject => (false, None),
            StageAction::Evaluate => {
                let input = EvaluationInput {
                    candidate_name: ctx.candidate_name.clone(),
                    job_title: ctx.job_title.clone(),
                    stage_name: stage.name.clone(),
                    prior_score: record.ai_score,
                    prior_analysis: record.ai_analysis.clone(),
                };
                let evaluation = self
                    .evaluator
                    .evaluate(&input)
                    .await?
                    .validated(self.config.ai_pass_threshold)?;
                (evaluation.passed, Some(evaluation))
            }
        };

        let status = if passed {
            EventStatus::Passed
        } else {
            EventStatus::Failed
        };
        let mut draft = EventDraft::new(record.id, stage.id, status).with_notes(notes);
        if let Some(evaluation) = &evaluation {
            draft = draft
                .with_score(evaluation.score)
                .with_feedback(evaluation.to_feedback());
        }

        let (mut transition, settlement) = settle(record, &catalog, &stage, draft, passed);
        if let Some(evaluation) = &evaluation {
            transition.ai_score = Some(evaluation.score);
            transition.ai_analysis = Some(merge_analysis(
                record.ai_analysis.as_ref(),
                &stage,
                evaluation_entry(evaluation),
            ));
        }

        let (updated, event) = self.commit(&transition, &settlement).await?;
        let notification = self.notify(&ctx, &updated, &settlement).await;

        let (next_stage, message) = match &settlement {
            Settlement::Advanced(next) => (
                Some(next.name.clone()),
                format!("{} advanced from {} to {}", ctx.candidate_name, stage.name, next.name),
            ),
            Settlement::Hired => (
                None,
                format!("{} completed {} and was marked hired", ctx.candidate_name, stage.name),
            ),
            Settlement::Rejected => (
                None,
                format!("{} was rejected at {}", ctx.candidate_name, stage.name),
            ),
        };

        Ok(ActionOutcome {
            action: request.action,
            record: updated,
            event,
            evaluation,
            next_stage,
            notification: Some(notification),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use crate::model::CandidateStatus;
    use crate::store::PipelineStore;

    fn request(record_id: i64, action: StageAction) -> StageActionRequest {
        StageActionRequest {
            record_id,
            action,
            stage_id: None,
            notes: None,
        }
    }

    #[test]
    fn actions_parse_case_insensitively() {
        assert_eq!("Advance".parse::<StageAction>().unwrap(), StageAction::Advance);
        assert_eq!("evaluate".parse::<StageAction>().unwrap(), StageAction::Evaluate);
        assert!("promote".parse::<StageAction>().is_err());
        assert_eq!(StageAction::Reject.to_string(), "reject");
    }

    #[tokio::test]
    async fn failing_evaluation_rejects_without_next_stage_event() {
        let h = Harness::new([45.0]).await;
        let record = h.candidate_at("Ada", 3).await;

        let outcome = h
            .service
            .stage_action(request(record.id, StageAction::Evaluate))
            .await
            .unwrap();

        assert_eq!(outcome.record.status, CandidateStatus::Rejected);
        assert_eq!(outcome.event.status, EventStatus::Failed);
        assert_eq!(outcome.event.ai_score, Some(45.0));
        assert_eq!(outcome.next_stage, None);

        let events = h.store.list_events_for_record(record.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage_id, 3);
        assert!(h.store.invitations().await.is_empty());
    }

    #[tokio::test]
    async fn passing_evaluation_advances_manual_stage() {
        let h = Harness::new([72.0]).await;
        let record = h.candidate_at("Grace", 3).await;

        let outcome = h
            .service
            .stage_action(request(record.id, StageAction::Evaluate))
            .await
            .unwrap();

        assert_eq!(outcome.record.current_stage_id, Some(4));
        assert_eq!(outcome.record.ai_score, Some(72.0));
        assert_eq!(outcome.next_stage.as_deref(), Some("HR Round"));
        assert!(outcome.evaluation.unwrap().passed);
    }

    #[tokio::test]
    async fn advance_records_notes_and_moves_forward() {
        let h = Harness::new(Vec::new()).await;
        let record = h.candidate_at("Linus", 4).await;

        let outcome = h
            .service
            .stage_action(StageActionRequest {
                notes: Some("  great culture fit ".into()),
                stage_id: Some(4),
                ..request(record.id, StageAction::Advance)
            })
            .await
            .unwrap();

        assert_eq!(outcome.event.status, EventStatus::Passed);
        assert_eq!(outcome.event.notes.as_deref(), Some("great culture fit"));
        assert!(outcome.event.completed_at.is_some());
        assert_eq!(outcome.record.current_stage_id, Some(5));
        assert!(h.evaluator.calls().is_empty());
    }

    #[tokio::test]
    async fn advance_on_last_stage_hires() {
        let h = Harness::new(Vec::new()).await;
        let record = h.candidate_at("Barbara", 7).await;

        let outcome = h
            .service
            .stage_action(request(record.id, StageAction::Advance))
            .await
            .unwrap();

        assert_eq!(outcome.record.status, CandidateStatus::Hired);
        assert_eq!(outcome.record.current_stage_id, Some(7));
    }

    #[tokio::test]
    async fn reject_logs_failed_event() {
        let h = Harness::new(Vec::new()).await;
        let record = h.candidate("Ken").await;

        let outcome = h
            .service
            .stage_action(StageActionRequest {
                notes: Some("no work authorization".into()),
                ..request(record.id, StageAction::Reject)
            })
            .await
            .unwrap();

        assert_eq!(outcome.record.status, CandidateStatus::Rejected);
        assert_eq!(outcome.event.stage_id, 1);
        assert_eq!(outcome.event.notes.as_deref(), Some("no work authorization"));
        assert!(h.mailer.sent()[0].subject.starts_with("Your application"));
    }

    #[tokio::test]
    async fn terminal_records_refuse_actions() {
        let h = Harness::new(Vec::new()).await;
        let record = h.candidate("Edsger").await;
        h.service
            .stage_action(request(record.id, StageAction::Reject))
            .await
            .unwrap();

        let err = h
            .service
            .stage_action(request(record.id, StageAction::Advance))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));
    }

    #[tokio::test]
    async fn mismatched_stage_is_a_conflict() {
        let h = Harness::new(Vec::new()).await;
        let record = h.candidate_at("Alan", 5).await;

        let err = h
            .service
            .stage_action(StageActionRequest {
                stage_id: Some(4),
                ..request(record.id, StageAction::Advance)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));
        assert_eq!(h.store.record(record.id).await.unwrap().current_stage_id, Some(5));
    }
}
