use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use hf_common::PipelineService;
use hf_common::pipeline::{BoardSubscription, PipelineBoard, Refresh};
use serde_json::json;
use tracing::{debug, warn};

use super::Success;
use crate::SharedState;
use crate::auth::Employer;
use crate::error::ApiError;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub async fn get_board(
    State(state): State<SharedState>,
    Employer(_): Employer,
    Path(job_id): Path<i64>,
) -> Result<Json<Success<PipelineBoard>>, ApiError> {
    let board = state.pipeline.board(job_id).await?;
    Ok(Json(Success::new(board)))
}

struct BoardStream {
    pipeline: Arc<PipelineService>,
    subscription: BoardSubscription,
    primed: bool,
}

impl BoardStream {
    async fn snapshot(&self, reason: &'static str) -> Option<Result<Event, axum::Error>> {
        let job_id = self.subscription.job_id();
        match self.pipeline.board(job_id).await {
            Ok(board) => Some(
                Event::default()
                    .event("board")
                    .json_data(json!({ "reason": reason, "board": board })),
            ),
            Err(err) => {
                warn!(job_id, error = %err, "board refresh failed; closing stream");
                None
            }
        }
    }
}

/// Streams the whole board once, then again after every change to the job.
///
/// The subscription is dropped, and with it the feed receiver, when the
/// client disconnects.
pub async fn stream_board(
    State(state): State<SharedState>,
    Employer(_): Employer,
    Path(job_id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    // Fail before upgrading if the board cannot be read at all.
    state.pipeline.board(job_id).await?;

    let initial = BoardStream {
        subscription: state.pipeline.subscribe(job_id),
        pipeline: state.pipeline.clone(),
        primed: false,
    };

    let events = stream::unfold(initial, |mut board| async move {
        if !board.primed {
            board.primed = true;
            let event = board.snapshot("snapshot").await?;
            return Some((event, board));
        }
        let reason = match board.subscription.next().await? {
            Refresh::Changed(change) => {
                debug!(job_id = change.job_id, record_id = change.record_id, "board changed");
                "changed"
            }
            Refresh::Resync => "resync",
        };
        let event = board.snapshot(reason).await?;
        Some((event, board))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
