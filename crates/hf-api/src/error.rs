use std::{borrow::Cow, future::Future};

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use hf_common::llm::LlmError;
use hf_common::{PipelineError, StoreError};

tokio::task_local! {
    static REQUEST_ID: String;
}

fn sanitize_message(message: &str) -> String {
    const MAX_LEN: usize = 240;

    let mut cleaned = message
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .split_whitespace()
        .map(|token| {
            if token.contains("://") {
                "[redacted-url]".to_string()
            } else if token.starts_with('/') || token.contains('\\') {
                "[redacted-path]".to_string()
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.len() > MAX_LEN {
        let mut end = MAX_LEN;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
        cleaned.push_str("...");
    }

    if cleaned.trim().is_empty() {
        "unexpected error".to_string()
    } else {
        cleaned
    }
}

pub async fn with_request_id<Fut, T>(request_id: Option<String>, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    match request_id {
        Some(request_id) => REQUEST_ID.scope(request_id, fut).await,
        None => fut.await,
    }
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|value| value.clone()).ok()
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("database error: {0}")]
    Database(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("payment required: {0}")]
    PaymentRequired(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    #[error("upstream AI error: {0}")]
    Upstream(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    request_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.code();
        let request_id = current_request_id();

        if status.is_server_error() {
            error!(code, status = %status, request_id = request_id.as_deref().unwrap_or(""), error = %self, "api_error");
        } else {
            warn!(code, status = %status, request_id = request_id.as_deref().unwrap_or(""), error = %self, "api_error");
        }

        let body = Json(ErrorResponse {
            code,
            message: self.public_message().into_owned(),
            request_id,
        });

        (status, body).into_response()
    }
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::PaymentRequired(_) => "payment_required",
            ApiError::Conflict(_) => "conflict",
            ApiError::Gone(_) => "gone",
            ApiError::TooManyRequests(_) => "too_many_requests",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Database(_) => "database_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> Cow<'static, str> {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Gone(msg) => Cow::Owned(sanitize_message(msg)),
            ApiError::Unauthorized(_) => Cow::Borrowed("unauthorized"),
            ApiError::Forbidden(_) => Cow::Borrowed("forbidden"),
            ApiError::PaymentRequired(_) => {
                Cow::Borrowed("AI credits exhausted, please add funds to continue")
            }
            ApiError::TooManyRequests(_) => {
                Cow::Borrowed("rate limit exceeded, please try again later")
            }
            ApiError::Upstream(_) => Cow::Borrowed("AI service request failed"),
            ApiError::ServiceUnavailable(_) => Cow::Borrowed("service unavailable"),
            ApiError::Database(_) | ApiError::Internal(_) => Cow::Borrowed("internal server error"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) | ApiError::Database(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            other => ApiError::Database(other.to_string()),
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(value: LlmError) -> Self {
        match value {
            LlmError::RateLimited { .. } => ApiError::TooManyRequests(value.to_string()),
            LlmError::QuotaExhausted => ApiError::PaymentRequired(value.to_string()),
            LlmError::Disabled => ApiError::ServiceUnavailable(value.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Store(err) => err.into(),
            PipelineError::Llm(err) => err.into(),
            PipelineError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            PipelineError::InvalidInput(msg) => ApiError::BadRequest(msg),
            PipelineError::Gone(msg) => ApiError::Gone(msg),
            PipelineError::Conflict(msg) => ApiError::Conflict(msg),
            PipelineError::Misconfigured(msg) => ApiError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use serde_json::Value;

    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, Value) {
        let response = with_request_id(Some("req-123".into()), async { err.into_response() }).await;
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        (parts.status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn includes_request_id_in_response_body_when_present() {
        let (status, json) = body_json(ApiError::Internal("boom".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["request_id"], "req-123");
        assert_eq!(json["message"], "internal server error");
    }

    #[tokio::test]
    async fn ai_failures_map_to_documented_statuses() {
        let rate_limited: ApiError = PipelineError::Llm(LlmError::RateLimited {
            retry_after_secs: None,
        })
        .into();
        assert_eq!(rate_limited.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let quota: ApiError = PipelineError::Llm(LlmError::QuotaExhausted).into();
        let (status, json) = body_json(quota).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(json["code"], "payment_required");

        let generic: ApiError = PipelineError::Llm(LlmError::Network("reset".into())).into();
        assert_eq!(generic.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn session_errors_keep_their_messages() {
        let gone: ApiError = PipelineError::Gone("invitation has expired".into()).into();
        let (status, json) = body_json(gone).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(json["message"], "invitation has expired");

        let conflict: ApiError = PipelineError::Conflict("interview already completed".into()).into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn sanitizer_redacts_urls_and_paths() {
        let cleaned = sanitize_message("failed at https://db.internal:5432 reading /etc/secret");
        assert_eq!(cleaned, "failed at [redacted-url] reading [redacted-path]");
    }
}
