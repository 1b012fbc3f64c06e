use axum::{Json, extract::State};
use hf_common::pipeline::{StartedInterview, SubmittedInterview};
use serde::Deserialize;

use super::Success;
use crate::SharedState;
use crate::error::ApiError;

const MAX_ANSWERS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct StartBody {
    #[serde(default)]
    pub token: String,
}

/// Opens (or resumes) the assessment behind an invitation token.
pub async fn start(
    State(state): State<SharedState>,
    Json(body): Json<StartBody>,
) -> Result<Json<Success<StartedInterview>>, ApiError> {
    let started = state.pipeline.start_interview(&body.token).await?;
    Ok(Json(Success::new(started)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    #[serde(default)]
    pub token: String,
    pub response_id: i64,
    #[serde(default)]
    pub answers: Vec<String>,
}

/// Scores a session; the invitation token must match the response.
pub async fn submit(
    State(state): State<SharedState>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<Success<SubmittedInterview>>, ApiError> {
    if body.answers.len() > MAX_ANSWERS {
        return Err(ApiError::BadRequest(format!(
            "at most {MAX_ANSWERS} answers are accepted"
        )));
    }
    let submitted = state
        .pipeline
        .submit_interview(&body.token, body.response_id, body.answers)
        .await?;
    Ok(Json(Success::new(submitted)))
}
