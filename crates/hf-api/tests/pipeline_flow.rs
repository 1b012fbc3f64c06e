use std::sync::Arc;
use std::time::Duration;

use axum::{Router, body::Body, http::Request, http::StatusCode};
use hf_common::PipelineService;
use hf_common::config::PipelineConfig;
use hf_common::notify::RecordingMailer;
use hf_common::pipeline::{FallbackOnlyGenerator, ScriptedEvaluator};
use hf_common::store::MemoryStore;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

const KEY: &str = "test-key";

struct App {
    router: Router,
    store: Arc<MemoryStore>,
    mailer: Arc<RecordingMailer>,
    job_id: i64,
    record_id: i64,
}

async fn app(scores: Vec<f64>) -> App {
    let store = Arc::new(MemoryStore::with_default_catalog());
    let mailer = Arc::new(RecordingMailer::new());
    let service = PipelineService::new(
        store.clone(),
        Arc::new(ScriptedEvaluator::new(scores)),
        Arc::new(FallbackOnlyGenerator),
        mailer.clone(),
        PipelineConfig::immediate(),
    );
    let job_id = store.insert_job("Backend Engineer").await;
    let profile = store.insert_profile("Ada", Some("ada@example.com")).await;
    let record_id = store.insert_record(job_id, profile).await.id;

    App {
        router: hf_api::create_router(hf_api::state_with_service(KEY, service)),
        store,
        mailer,
        job_id,
        record_id,
    }
}

async fn post(router: &Router, uri: &str, body: Value, api_key: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn auto_progress_stops_at_manual_stage_and_board_reflects_it() {
    let app = app(vec![75.0, 80.0]).await;

    let (status, body) = post(
        &app.router,
        "/api/pipeline/auto-progress",
        json!({ "candidateId": app.record_id, "autoProgressAll": true }),
        Some(KEY),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "active");
    assert_eq!(body["currentStage"], "Technical Assessment");
    assert_eq!(body["halted"], "manual_stage");
    assert_eq!(body["evaluated"].as_array().unwrap().len(), 2);
    assert!(app.store.invitations().await.is_empty());
    assert_eq!(app.mailer.sent().len(), 1);

    let (status, board) = get(&app.router, &format!("/api/jobs/{}/pipeline", app.job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["totalCandidates"], 1);
    let columns = board["columns"].as_array().unwrap();
    let technical = columns
        .iter()
        .find(|column| column["stage"]["name"] == "Technical Assessment")
        .unwrap();
    assert_eq!(technical["candidates"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn evaluate_action_with_low_score_rejects() {
    let app = app(vec![45.0]).await;

    let (status, body) = post(
        &app.router,
        "/api/pipeline/stage-action",
        json!({ "recordId": app.record_id, "action": "evaluate" }),
        Some(KEY),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record"]["status"], "rejected");
    assert!(body["nextStage"].is_null());

    let (status, body) = post(
        &app.router,
        "/api/pipeline/stage-action",
        json!({ "recordId": app.record_id, "action": "advance" }),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn unknown_action_and_record_are_client_errors() {
    let app = app(Vec::new()).await;

    let (status, _) = post(
        &app.router,
        "/api/pipeline/stage-action",
        json!({ "recordId": app.record_id, "action": "promote" }),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(
        &app.router,
        "/api/pipeline/auto-progress",
        json!({ "recordId": 9_999 }),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn invitation_token_drives_a_single_assessment() {
    let app = app(vec![75.0]).await;

    let (status, body) = post(
        &app.router,
        "/api/pipeline/auto-progress",
        json!({ "recordId": app.record_id }),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["halted"], "single_step");

    let invitations = app.store.invitations().await;
    assert_eq!(invitations.len(), 1);
    let token = invitations[0].token.clone();

    let (status, started) =
        post(&app.router, "/api/interview/start", json!({ "token": token }), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["stageName"], "AI Phone Interview");
    let questions = started["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 5);
    assert!(questions.iter().all(|q| q.get("correctAnswer").is_none()));

    let stored = app.store.responses().await;
    let answers: Vec<String> = stored[0]
        .questions
        .iter()
        .map(|q| q.correct_answer.clone())
        .collect();

    let (status, submitted) = post(
        &app.router,
        "/api/interview/submit",
        json!({ "token": token, "responseId": started["responseId"], "answers": answers }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["passed"], true);
    assert_eq!(submitted["score"].as_f64(), Some(100.0));
    assert_eq!(submitted["nextStage"], "Technical Assessment");

    let (status, again) =
        post(&app.router, "/api/interview/start", json!({ "token": token }), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["message"], "interview already completed");
}

#[tokio::test]
async fn unknown_and_missing_tokens_are_rejected() {
    let app = app(Vec::new()).await;

    let (status, _) = post(&app.router, "/api/interview/start", json!({}), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &app.router,
        "/api/interview/start",
        json!({ "token": "not-a-token" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn submit_without_the_session_token_is_refused() {
    let app = app(vec![75.0]).await;
    let (status, _) = post(
        &app.router,
        "/api/pipeline/auto-progress",
        json!({ "recordId": app.record_id }),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = app.store.invitations().await[0].token.clone();

    let (status, started) =
        post(&app.router, "/api/interview/start", json!({ "token": token }), None).await;
    assert_eq!(status, StatusCode::OK);
    let response_id = started["responseId"].clone();

    let (status, _) = post(
        &app.router,
        "/api/interview/submit",
        json!({ "responseId": response_id, "answers": [] }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &app.router,
        "/api/interview/submit",
        json!({ "token": "guessed", "responseId": response_id, "answers": [] }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let responses = app.store.responses().await;
    assert!(responses.iter().all(|response| !response.is_completed()));
    let record = app.store.record(app.record_id).await.unwrap();
    assert_eq!(record.status.as_str(), "active");
}

#[tokio::test]
async fn board_stream_sends_snapshot_then_changes() {
    let app = app(vec![75.0]).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/jobs/{}/pipeline/stream", app.job_id))
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    let first = String::from_utf8(first.to_vec()).unwrap();
    assert!(first.contains("event: board"));
    assert!(first.contains(r#""reason":"snapshot""#));

    let (status, _) = post(
        &app.router,
        "/api/pipeline/auto-progress",
        json!({ "recordId": app.record_id }),
        Some(KEY),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let next = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .into_data()
        .unwrap();
    let next = String::from_utf8(next.to_vec()).unwrap();
    assert!(next.contains(r#""reason":"changed""#));
}
