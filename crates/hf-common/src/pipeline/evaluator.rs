//! AI scoring of a candidate at one stage.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::llm::{FunctionSpec, GatewayClient, LlmError};

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationInput {
    pub candidate_name: String,
    pub job_title: String,
    pub stage_name: String,
    pub prior_score: Option<f64>,
    pub prior_analysis: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl Evaluation {
    /// Checks the raw output and recomputes `passed` from `threshold`.
    pub fn validated(mut self, threshold: f64) -> Result<Self, LlmError> {
        if !self.score.is_finite() || !(0.0..=100.0).contains(&self.score) {
            return Err(LlmError::InvalidOutput(format!(
                "score {} outside 0-100",
                self.score
            )));
        }
        self.feedback = self.feedback.trim().to_string();
        if self.feedback.is_empty() {
            return Err(LlmError::InvalidOutput("feedback is empty".into()));
        }
        self.observations.retain(|obs| !obs.trim().is_empty());

        let passed = self.score >= threshold;
        if passed != self.passed {
            warn!(
                score = self.score,
                threshold,
                model_passed = self.passed,
                "evaluator pass flag disagrees with threshold; using threshold"
            );
        }
        self.passed = passed;
        Ok(self)
    }

    /// Shape stored in `interview_events.ai_feedback`.
    pub fn to_feedback(&self) -> Value {
        json!({
            "feedback": self.feedback,
            "observations": self.observations,
            "passed": self.passed,
        })
    }
}

#[async_trait]
pub trait StageEvaluator: Send + Sync {
    async fn evaluate(&self, input: &EvaluationInput) -> Result<Evaluation, LlmError>;
}

const SYSTEM_PROMPT: &str = "You are an experienced technical recruiter evaluating a candidate \
at one stage of a structured interview pipeline. Score the candidate from 0 to 100 using the \
information provided. A score of 60 or more means the candidate should advance. Be concise and \
specific in your feedback.";

fn evaluate_function() -> FunctionSpec {
    FunctionSpec {
        name: "evaluate_candidate",
        description: "Record the evaluation of a candidate for the current interview stage",
        parameters: json!({
            "type": "object",
            "properties": {
                "score": { "type": "number", "minimum": 0, "maximum": 100 },
                "passed": { "type": "boolean" },
                "feedback": { "type": "string", "description": "Two or three sentences for the hiring team" },
                "observations": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Short notable strengths or concerns"
                }
            },
            "required": ["score", "passed", "feedback"],
            "additionalProperties": false
        }),
    }
}

/// Evaluator backed by the AI gateway.
pub struct LlmStageEvaluator {
    client: Arc<GatewayClient>,
}

impl LlmStageEvaluator {
    pub fn new(client: Arc<GatewayClient>) -> Self {
        Self { client }
    }

    fn user_prompt(input: &EvaluationInput) -> String {
        let prior_score = input
            .prior_score
            .map(|score| format!("{score:.1}"))
            .unwrap_or_else(|| "none".into());
        let prior_analysis = input
            .prior_analysis
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "none".into());
        format!(
            "Candidate: {}\nPosition: {}\nStage: {}\nPrevious stage score: {}\nPrevious analysis: {}\n\n\
             Evaluate how well this candidate is likely to perform at the {} stage.",
            input.candidate_name,
            input.job_title,
            input.stage_name,
            prior_score,
            prior_analysis,
            input.stage_name,
        )
    }
}

#[async_trait]
impl StageEvaluator for LlmStageEvaluator {
    async fn evaluate(&self, input: &EvaluationInput) -> Result<Evaluation, LlmError> {
        let started = Instant::now();
        let result = self
            .client
            .call_function(SYSTEM_PROMPT, &Self::user_prompt(input), &evaluate_function())
            .await;
        metrics::histogram!("hf_stage_evaluation_seconds").record(started.elapsed().as_secs_f64());
        serde_json::from_value(result?).map_err(|e| LlmError::InvalidOutput(e.to_string()))
    }
}

/// Returns queued scores in order and remembers which stages were asked for.
#[derive(Default)]
pub struct ScriptedEvaluator {
    scores: Mutex<VecDeque<f64>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn new(scores: impl IntoIterator<Item = f64>) -> Self {
        Self {
            scores: Mutex::new(scores.into_iter().collect()),
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StageEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, input: &EvaluationInput) -> Result<Evaluation, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(input.stage_name.clone());
        }
        let next = self
            .scores
            .lock()
            .ok()
            .and_then(|mut scores| scores.pop_front());
        let score = next.ok_or_else(|| LlmError::RequestFailed {
            status: 500,
            body: "no scripted score left".into(),
        })?;
        Ok(Evaluation {
            score,
            passed: score >= 60.0,
            feedback: format!("Scripted evaluation for {}", input.stage_name),
            observations: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmConfig;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn evaluation(score: f64, passed: bool, feedback: &str) -> Evaluation {
        Evaluation {
            score,
            passed,
            feedback: feedback.into(),
            observations: vec!["clear communicator".into(), " ".into()],
        }
    }

    #[test]
    fn validation_recomputes_pass_flag() {
        let checked = evaluation(55.0, true, " ok ").validated(60.0).unwrap();
        assert!(!checked.passed);
        assert_eq!(checked.feedback, "ok");
        assert_eq!(checked.observations, vec!["clear communicator".to_string()]);

        assert!(evaluation(60.0, false, "ok").validated(60.0).unwrap().passed);
    }

    #[test]
    fn validation_rejects_out_of_range_and_empty_output() {
        assert!(evaluation(101.0, true, "ok").validated(60.0).is_err());
        assert!(evaluation(-1.0, false, "ok").validated(60.0).is_err());
        assert!(evaluation(f64::NAN, false, "ok").validated(60.0).is_err());
        assert!(evaluation(70.0, true, "   ").validated(60.0).is_err());
    }

    #[tokio::test]
    async fn llm_evaluator_parses_tool_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "tool_choice": { "function": { "name": "evaluate_candidate" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "tool_calls": [{
                            "function": {
                                "name": "evaluate_candidate",
                                "arguments": "{\"score\":82,\"passed\":true,\"feedback\":\"Strong systems background\",\"observations\":[\"rust\"]}"
                            }
                        }]
                    }
                }]
            })))
            .mount(&server)
            .await;

        let client = GatewayClient::new(LlmConfig {
            endpoint: server.uri(),
            api_key: "k".into(),
            ..LlmConfig::default()
        })
        .unwrap();
        let evaluator = LlmStageEvaluator::new(Arc::new(client));
        let result = evaluator
            .evaluate(&EvaluationInput {
                candidate_name: "Ada".into(),
                job_title: "Engineer".into(),
                stage_name: "Resume Screening".into(),
                prior_score: None,
                prior_analysis: None,
            })
            .await
            .unwrap();

        assert_eq!(result.score, 82.0);
        assert_eq!(result.observations, vec!["rust".to_string()]);
    }

    #[tokio::test]
    async fn llm_evaluator_rejects_missing_score() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "{\"feedback\":\"no score\"}" } }]
            })))
            .mount(&server)
            .await;

        let client = GatewayClient::new(LlmConfig {
            endpoint: server.uri(),
            api_key: "k".into(),
            ..LlmConfig::default()
        })
        .unwrap();
        let err = LlmStageEvaluator::new(Arc::new(client))
            .evaluate(&EvaluationInput {
                candidate_name: "Ada".into(),
                job_title: "Engineer".into(),
                stage_name: "Viva".into(),
                prior_score: Some(70.0),
                prior_analysis: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidOutput(_)));
    }

    #[test]
    fn failed_evaluations_still_record_latency() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let server = runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
                .mount(&server)
                .await;
            server
        });

        let client = GatewayClient::new(LlmConfig {
            endpoint: server.uri(),
            api_key: "k".into(),
            ..LlmConfig::default()
        })
        .unwrap();
        let evaluator = LlmStageEvaluator::new(Arc::new(client));
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        let result = metrics::with_local_recorder(&recorder, || {
            runtime.block_on(evaluator.evaluate(&EvaluationInput {
                candidate_name: "Ada".into(),
                job_title: "Engineer".into(),
                stage_name: "Resume Screening".into(),
                prior_score: None,
                prior_analysis: None,
            }))
        });

        assert!(matches!(result, Err(LlmError::RequestFailed { status: 500, .. })));
        assert!(handle.render().contains("hf_stage_evaluation_seconds_count 1"));
    }
}
