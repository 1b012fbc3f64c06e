use axum::{Json, extract::State};
use hf_common::pipeline::{ActionOutcome, ProgressReport, StageAction, StageActionRequest};
use serde::Deserialize;
use tracing::info;

use super::Success;
use crate::SharedState;
use crate::auth::Employer;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoProgressBody {
    #[serde(alias = "candidateId")]
    pub record_id: i64,
    #[serde(default)]
    pub auto_progress_all: bool,
}

pub async fn auto_progress(
    State(state): State<SharedState>,
    Employer(user): Employer,
    Json(body): Json<AutoProgressBody>,
) -> Result<Json<Success<ProgressReport>>, ApiError> {
    if body.record_id <= 0 {
        return Err(ApiError::BadRequest("recordId must be positive".into()));
    }
    info!(
        record_id = body.record_id,
        auto_progress_all = body.auto_progress_all,
        caller = %user.subject,
        "auto-progress requested"
    );

    let report = state
        .pipeline
        .auto_progress(body.record_id, body.auto_progress_all)
        .await?;
    Ok(Json(Success::new(report)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageActionBody {
    #[serde(alias = "candidateId")]
    pub record_id: i64,
    pub action: String,
    #[serde(default)]
    pub stage_id: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn stage_action(
    State(state): State<SharedState>,
    Employer(user): Employer,
    Json(body): Json<StageActionBody>,
) -> Result<Json<Success<ActionOutcome>>, ApiError> {
    let action = body.action.trim().parse::<StageAction>().map_err(|_| {
        ApiError::BadRequest(format!(
            "unknown action {:?}; expected advance, reject or evaluate",
            body.action
        ))
    })?;
    info!(record_id = body.record_id, %action, caller = %user.subject, "stage action requested");

    let outcome = state
        .pipeline
        .stage_action(StageActionRequest {
            record_id: body.record_id,
            action,
            stage_id: body.stage_id,
            notes: body.notes,
        })
        .await?;
    Ok(Json(Success::new(outcome)))
}
