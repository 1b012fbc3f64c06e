use serde::Serialize;
use tracing::{info, instrument};

use super::{
    DispatchReport, EvaluationInput, PipelineError, PipelineService, Settlement, evaluation_entry,
    merge_analysis, settle,
};
use crate::model::{CandidateStatus, EventDraft, EventStatus, RecordContext, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Reached a stage that needs an employer decision.
    ManualStage,
    Rejected,
    Hired,
    /// One stage was evaluated and the caller did not ask for more.
    SingleStep,
    /// The record was already rejected or hired.
    NotActive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage_id: i64,
    pub stage_name: String,
    pub score: f64,
    pub passed: bool,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub record_id: i64,
    pub status: CandidateStatus,
    pub current_stage: Option<String>,
    pub halted: HaltReason,
    pub evaluated: Vec<StageResult>,
    pub rejected_at: Option<String>,
    pub notification: Option<DispatchReport>,
    pub message: String,
}

impl PipelineService {
    /// Walks AI-automated stages from the record's current stage.
    ///
    /// Stops at the first manual stage (including the current one), on a
    /// failing score, after the last stage, or after one stage unless
    /// `auto_progress_all`. Completed steps stay committed if a later AI call
    /// fails.
    #[instrument(skip(self), fields(job_id = tracing::field::Empty))]
    pub async fn auto_progress(
        &self,
        record_id: i64,
        auto_progress_all: bool,
    ) -> Result<ProgressReport, PipelineError> {
        let (ctx, catalog) = self.load(record_id).await?;
        tracing::Span::current().record("job_id", ctx.record.job_id);

        let mut record = ctx.record.clone();
        let current = catalog
            .current(record.current_stage_id)
            .cloned()
            .ok_or_else(|| {
                PipelineError::Misconfigured(format!(
                    "record {record_id} points at unknown stage {:?}",
                    record.current_stage_id
                ))
            })?;

        if !record.is_active() {
            return Ok(ProgressReport {
                record_id,
                status: record.status,
                current_stage: Some(current.name),
                halted: HaltReason::NotActive,
                evaluated: vec![],
                rejected_at: None,
                notification: None,
                message: format!("Candidate is already {}", record.status.as_str()),
            });
        }

        let walk: Vec<Stage> = catalog.from_order(current.order).cloned().collect();
        let mut evaluated = Vec::new();
        let mut halted = HaltReason::ManualStage;
        let mut last_settlement = None;

        for stage in &walk {
            if !stage.is_ai_automated {
                halted = HaltReason::ManualStage;
                break;
            }
            if !evaluated.is_empty() && !self.config.stage_delay.is_zero() {
                tokio::time::sleep(self.config.stage_delay).await;
            }

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

            let status = if evaluation.passed {
                EventStatus::Passed
            } else {
                EventStatus::Failed
            };
            let draft = EventDraft::new(record.id, stage.id, status)
                .with_score(evaluation.score)
                .with_feedback(evaluation.to_feedback());
            let (mut transition, settlement) =
                settle(&record, &catalog, stage, draft, evaluation.passed);
            transition.ai_score = Some(evaluation.score);
            transition.ai_analysis = Some(merge_analysis(
                record.ai_analysis.as_ref(),
                stage,
                evaluation_entry(&evaluation),
            ));

            let (updated, _event) = self.commit(&transition, &settlement).await?;
            record = updated;
            evaluated.push(StageResult {
                stage_id: stage.id,
                stage_name: stage.name.clone(),
                score: evaluation.score,
                passed: evaluation.passed,
                feedback: evaluation.feedback.clone(),
            });

            match settlement {
                Settlement::Rejected => {
                    halted = HaltReason::Rejected;
                    last_settlement = Some(Settlement::Rejected);
                    break;
                }
                Settlement::Hired => {
                    halted = HaltReason::Hired;
                    last_settlement = Some(Settlement::Hired);
                    break;
                }
                Settlement::Advanced(next) => {
                    last_settlement = Some(Settlement::Advanced(next));
                    if !auto_progress_all {
                        halted = HaltReason::SingleStep;
                        break;
                    }
                }
            }
        }

        let current_stage = catalog
            .current(record.current_stage_id)
            .map(|stage| stage.name.clone());
        let rejected_at = match halted {
            HaltReason::Rejected => evaluated.last().map(|r| r.stage_name.clone()),
            _ => None,
        };

        let notification = match &last_settlement {
            Some(settlement) => Some(self.notify(&ctx, &record, settlement).await),
            None => None,
        };

        let message = summarize(&ctx, &evaluated, halted, current_stage.as_deref());
        info!(
            record_id,
            evaluated = evaluated.len(),
            halted = ?halted,
            status = record.status.as_str(),
            "auto-progress finished"
        );

        Ok(ProgressReport {
            record_id,
            status: record.status,
            current_stage,
            halted,
            evaluated,
            rejected_at,
            notification,
            message,
        })
    }
}

fn summarize(
    ctx: &RecordContext,
    evaluated: &[StageResult],
    halted: HaltReason,
    current_stage: Option<&str>,
) -> String {
    let name = &ctx.candidate_name;
    let stage = current_stage.unwrap_or("unknown stage");
    match halted {
        HaltReason::Rejected => {
            let last = evaluated.last();
            format!(
                "{name} did not pass {} (score {:.1}) and was rejected",
                last.map(|r| r.stage_name.as_str()).unwrap_or(stage),
                last.map(|r| r.score).unwrap_or_default()
            )
        }
        HaltReason::Hired => format!("{name} passed every stage and was marked hired"),
        HaltReason::ManualStage if evaluated.is_empty() => {
            format!("{name} is waiting at {stage}, which requires a manual decision")
        }
        HaltReason::ManualStage => format!(
            "{name} passed {} automated stage(s) and is now at {stage}, which requires a manual decision",
            evaluated.len()
        ),
        HaltReason::SingleStep => format!("{name} advanced to {stage}"),
        HaltReason::NotActive => format!("{name} is no longer active"),
    }
}
