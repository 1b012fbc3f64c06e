//! Token-gated multiple-choice assessments.
//!
//! `start_interview` trades an invitation token for a question set (without
//! answers); `submit_interview`, gated by the same token, scores it locally by exact match and settles
//! the stage with the assessment threshold.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::{
    DispatchReport, PipelineError, PipelineService, Settlement, ensure_active, merge_analysis,
    settle,
};
use crate::llm::{FunctionSpec, GatewayClient, LlmError};
use crate::model::{
    AssessmentQuestion, CandidateStatus, EventDraft, EventStatus, PublicQuestion,
    ResponseCompletion,
};

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRequest {
    pub job_title: String,
    pub stage_name: String,
    pub count: usize,
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, request: &QuestionRequest)
    -> Result<Vec<AssessmentQuestion>, LlmError>;
}

fn questions_function(count: usize) -> FunctionSpec {
    FunctionSpec {
        name: "create_assessment",
        description: "Return the multiple-choice questions for the assessment",
        parameters: json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "minItems": count,
                    "maxItems": count,
                    "items": {
                        "type": "object",
                        "properties": {
                            "question": { "type": "string" },
                            "options": {
                                "type": "array",
                                "items": { "type": "string" },
                                "minItems": 4,
                                "maxItems": 4
                            },
                            "correctAnswer": {
                                "type": "string",
                                "description": "Must equal one of the options exactly"
                            }
                        },
                        "required": ["question", "options", "correctAnswer"]
                    }
                }
            },
            "required": ["questions"]
        }),
    }
}

#[derive(Deserialize)]
struct GeneratedQuestions {
    questions: Vec<AssessmentQuestion>,
}

pub struct LlmQuestionGenerator {
    client: Arc<GatewayClient>,
}

impl LlmQuestionGenerator {
    pub fn new(client: Arc<GatewayClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QuestionGenerator for LlmQuestionGenerator {
    async fn generate(
        &self,
        request: &QuestionRequest,
    ) -> Result<Vec<AssessmentQuestion>, LlmError> {
        let system = "You write fair, unambiguous multiple-choice interview questions. \
                      Each question has exactly four options and one correct answer.";
        let user = format!(
            "Write {} questions for the {} stage of the hiring process for a {} role.",
            request.count, request.stage_name, request.job_title
        );
        let args = self
            .client
            .call_function(system, &user, &questions_function(request.count))
            .await?;
        let generated: GeneratedQuestions =
            serde_json::from_value(args).map_err(|e| LlmError::InvalidOutput(e.to_string()))?;
        Ok(generated.questions)
    }
}

/// Always defers to the built-in question bank.
pub struct FallbackOnlyGenerator;

#[async_trait]
impl QuestionGenerator for FallbackOnlyGenerator {
    async fn generate(
        &self,
        _request: &QuestionRequest,
    ) -> Result<Vec<AssessmentQuestion>, LlmError> {
        Err(LlmError::Disabled)
    }
}

pub fn fallback_questions(count: usize) -> Vec<AssessmentQuestion> {
    let bank = [
        AssessmentQuestion::new(
            "What is the primary purpose of version control?",
            &[
                "Tracking changes to code over time",
                "Compiling code faster",
                "Encrypting source files",
                "Designing user interfaces",
            ],
            "Tracking changes to code over time",
        ),
        AssessmentQuestion::new(
            "Which practice best improves code maintainability?",
            &[
                "Writing clear, well-structured code with tests",
                "Using as few files as possible",
                "Avoiding comments entirely",
                "Optimizing every line for speed",
            ],
            "Writing clear, well-structured code with tests",
        ),
        AssessmentQuestion::new(
            "A teammate disagrees with your approach in a code review. What do you do first?",
            &[
                "Understand their reasoning and discuss trade-offs",
                "Merge the change anyway",
                "Escalate to management immediately",
                "Rewrite the feature from scratch",
            ],
            "Understand their reasoning and discuss trade-offs",
        ),
        AssessmentQuestion::new(
            "What does an API primarily provide?",
            &[
                "A defined interface for software components to interact",
                "A graphical user interface",
                "A database backup",
                "A physical network connection",
            ],
            "A defined interface for software components to interact",
        ),
        AssessmentQuestion::new(
            "How should you handle an unclear requirement on a deadline?",
            &[
                "Ask clarifying questions early",
                "Guess and hope for the best",
                "Wait until the deadline passes",
                "Skip that requirement",
            ],
            "Ask clarifying questions early",
        ),
        AssessmentQuestion::new(
            "What is the main benefit of automated testing?",
            &[
                "Catching regressions quickly and reliably",
                "Eliminating the need for code review",
                "Making programs run faster",
                "Reducing the size of binaries",
            ],
            "Catching regressions quickly and reliably",
        ),
        AssessmentQuestion::new(
            "Which describes a good incident response first step?",
            &[
                "Assess impact and communicate status",
                "Blame the last person who deployed",
                "Ignore alerts until they stop",
                "Delete the logs",
            ],
            "Assess impact and communicate status",
        ),
        AssessmentQuestion::new(
            "What is technical debt?",
            &[
                "The future cost of choosing an expedient solution now",
                "Money owed to software vendors",
                "The number of open bug reports",
                "Unpaid overtime hours",
            ],
            "The future cost of choosing an expedient solution now",
        ),
    ];
    bank.into_iter().cycle().take(count).collect()
}

/// Percentage of exact matches, rounded to two decimals; zero with no questions.
pub fn score_answers(questions: &[AssessmentQuestion], answers: &[String]) -> (i32, f64) {
    let correct = questions
        .iter()
        .zip(answers)
        .filter(|(question, answer)| question.correct_answer == **answer)
        .count();
    if questions.is_empty() {
        return (0, 0.0);
    }
    let score = correct as f64 / questions.len() as f64 * 100.0;
    (
        i32::try_from(correct).unwrap_or(i32::MAX),
        (score * 100.0).round() / 100.0,
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedInterview {
    pub response_id: i64,
    pub candidate_name: String,
    pub job_title: String,
    pub stage_name: String,
    pub questions: Vec<PublicQuestion>,
    pub expires_at: DateTime<Utc>,
    pub resumed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedInterview {
    pub response_id: i64,
    pub score: f64,
    pub correct_answers: i32,
    pub total_questions: usize,
    pub passed: bool,
    pub status: CandidateStatus,
    pub next_stage: Option<String>,
    pub notification: Option<DispatchReport>,
    pub message: String,
}

impl PipelineService {
    #[instrument(skip(self, token))]
    pub async fn start_interview(&self, token: &str) -> Result<StartedInterview, PipelineError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(PipelineError::InvalidInput("token is required".into()));
        }

        let invitation = self
            .store
            .find_invitation(token)
            .await?
            .ok_or_else(|| PipelineError::NotFound("invitation".into()))?;
        let now = Utc::now();
        if invitation.is_expired(now) {
            return Err(PipelineError::Gone("invitation has expired".into()));
        }

        let event = self
            .store
            .get_event(invitation.stage_event_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("interview stage".into()))?;
        let existing = self.store.find_response_for_event(event.id).await?;
        if existing.as_ref().is_some_and(|r| r.is_completed()) || event.status.is_outcome() {
            return Err(PipelineError::Conflict("interview already completed".into()));
        }
        if existing.is_none() && invitation.used_at.is_some() {
            return Err(PipelineError::Conflict("invitation already used".into()));
        }

        let (ctx, catalog) = self.load(event.pipeline_record_id).await?;
        ensure_active(&ctx.record)?;
        let stage = catalog
            .get(event.stage_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("stage {}", event.stage_id)))?;

        let (response, resumed) = match existing {
            Some(response) => (response, true),
            None => {
                let questions = self
                    .question_set(&QuestionRequest {
                        job_title: ctx.job_title.clone(),
                        stage_name: stage.name.clone(),
                        count: self.config.question_count,
                    })
                    .await;
                let response = self.store.create_response(event.id, &questions).await?;
                self.store.mark_invitation_used(invitation.id, now).await?;
                self.store
                    .upsert_event(&EventDraft::new(
                        event.pipeline_record_id,
                        event.stage_id,
                        EventStatus::InProgress,
                    ))
                    .await?;
                self.feed.publish(super::PipelineChange {
                    job_id: ctx.record.job_id,
                    record_id: ctx.record.id,
                    kind: super::ChangeKind::Event,
                });
                (response, false)
            }
        };

        info!(
            record_id = ctx.record.id,
            response_id = response.id,
            resumed,
            "interview session started"
        );
        Ok(StartedInterview {
            response_id: response.id,
            candidate_name: ctx.candidate_name,
            job_title: ctx.job_title,
            stage_name: stage.name,
            questions: response.questions.iter().map(PublicQuestion::from).collect(),
            expires_at: invitation.expires_at,
            resumed,
        })
    }

    async fn question_set(&self, request: &QuestionRequest) -> Vec<AssessmentQuestion> {
        match self.questions.generate(request).await {
            Ok(questions)
                if questions.len() == request.count
                    && questions.iter().all(AssessmentQuestion::is_well_formed) =>
            {
                questions
            }
            Ok(questions) => {
                warn!(
                    generated = questions.len(),
                    expected = request.count,
                    "generated questions failed validation; using question bank"
                );
                fallback_questions(request.count)
            }
            Err(LlmError::Disabled) => fallback_questions(request.count),
            Err(err) => {
                warn!(error = %err, "question generation failed; using question bank");
                fallback_questions(request.count)
            }
        }
    }

    /// Scores a session; the invitation token must belong to the response's stage event.
    #[instrument(skip(self, token, answers), fields(answers = answers.len()))]
    pub async fn submit_interview(
        &self,
        token: &str,
        response_id: i64,
        answers: Vec<String>,
    ) -> Result<SubmittedInterview, PipelineError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(PipelineError::InvalidInput("token is required".into()));
        }
        let invitation = self
            .store
            .find_invitation(token)
            .await?
            .ok_or_else(|| PipelineError::NotFound("invitation".into()))?;
        let response = self
            .store
            .get_response(response_id)
            .await?
            .filter(|response| response.stage_event_id == invitation.stage_event_id)
            .ok_or_else(|| PipelineError::NotFound(format!("interview response {response_id}")))?;
        if invitation.is_expired(Utc::now()) {
            return Err(PipelineError::Gone("invitation has expired".into()));
        }
        if response.is_completed() {
            return Err(PipelineError::Conflict("interview already submitted".into()));
        }

        let event = self
            .store
            .get_event(response.stage_event_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("interview stage".into()))?;
        let (ctx, catalog) = self.load(event.pipeline_record_id).await?;
        ensure_active(&ctx.record)?;
        let stage = catalog
            .current(ctx.record.current_stage_id)
            .filter(|current| current.id == event.stage_id)
            .cloned()
            .ok_or_else(|| {
                PipelineError::Conflict("candidate has already moved past this stage".into())
            })?;

        let (correct_answers, score) = score_answers(&response.questions, &answers);
        let total_questions = response.questions.len();
        let passed = score >= self.config.assessment_pass_threshold;
        let status = if passed {
            EventStatus::Passed
        } else {
            EventStatus::Failed
        };
        let feedback = json!({
            "source": "assessment",
            "correctAnswers": correct_answers,
            "totalQuestions": total_questions,
            "passed": passed,
        });
        let draft = EventDraft::new(ctx.record.id, stage.id, status)
            .with_score(score)
            .with_feedback(feedback.clone());
        let (mut transition, settlement) = settle(&ctx.record, &catalog, &stage, draft, passed);
        transition.ai_score = Some(score);
        transition.ai_analysis = Some(merge_analysis(
            ctx.record.ai_analysis.as_ref(),
            &stage,
            with_score(feedback, score),
        ));
        transition.completion = Some(ResponseCompletion {
            response_id: response.id,
            answers,
            correct_answers,
            score,
            completed_at: Utc::now(),
        });

        let (updated, _event) = self.commit(&transition, &settlement).await?;
        let notification = self.notify(&ctx, &updated, &settlement).await;

        let (next_stage, message) = match &settlement {
            Settlement::Advanced(next) => (
                Some(next.name.clone()),
                format!("You scored {score:.0}% and advanced to {}", next.name),
            ),
            Settlement::Hired => (
                None,
                format!("You scored {score:.0}% and completed the final stage"),
            ),
            Settlement::Rejected => (
                None,
                format!("You scored {score:.0}%. Thank you for taking the assessment"),
            ),
        };

        Ok(SubmittedInterview {
            response_id,
            score,
            correct_answers,
            total_questions,
            passed,
            status: updated.status,
            next_stage,
            notification: Some(notification),
            message,
        })
    }
}

fn with_score(mut feedback: Value, score: f64) -> Value {
    if let Value::Object(map) = &mut feedback {
        map.insert("score".into(), json!(score));
    }
    feedback
}
