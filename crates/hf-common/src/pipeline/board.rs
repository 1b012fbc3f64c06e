use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{CandidateStatus, EventStatus, PipelineRecord, Stage, StageCatalog, StageEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageProgress {
    Completed,
    Current,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMark {
    pub stage_id: i64,
    pub stage_name: String,
    pub progress: StageProgress,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardCard {
    pub record_id: i64,
    pub candidate_id: i64,
    pub status: CandidateStatus,
    pub ai_score: Option<f64>,
    pub resume_url: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stages: Vec<StageMark>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardColumn {
    pub stage: Stage,
    pub candidates: Vec<BoardCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineBoard {
    pub job_id: i64,
    pub total_candidates: usize,
    pub columns: Vec<BoardColumn>,
}

fn progress_for(
    stage: &Stage,
    current: Option<&Stage>,
    event: Option<&StageEvent>,
) -> StageProgress {
    match event.map(|e| e.status) {
        Some(EventStatus::Failed) => return StageProgress::Failed,
        Some(EventStatus::Passed | EventStatus::Completed) => return StageProgress::Completed,
        _ => {}
    }
    match current {
        Some(current) if stage.order < current.order => StageProgress::Completed,
        Some(current) if stage.id == current.id => StageProgress::Current,
        _ => StageProgress::Pending,
    }
}

/// Projects active records onto the stage columns.
pub fn build_board(
    job_id: i64,
    catalog: &StageCatalog,
    records: &[PipelineRecord],
    events: &[StageEvent],
) -> PipelineBoard {
    let mut by_record: HashMap<(i64, i64), &StageEvent> = HashMap::new();
    for event in events {
        // Later ids win if the table ever holds more than one row per pair.
        let slot = by_record
            .entry((event.pipeline_record_id, event.stage_id))
            .or_insert(event);
        if event.id > slot.id {
            *slot = event;
        }
    }

    let mut columns: Vec<BoardColumn> = catalog
        .stages()
        .iter()
        .map(|stage| BoardColumn {
            stage: stage.clone(),
            candidates: Vec::new(),
        })
        .collect();

    let mut total_candidates = 0;
    for record in records.iter().filter(|r| r.is_active()) {
        let current = catalog.current(record.current_stage_id);
        let stages = catalog
            .stages()
            .iter()
            .map(|stage| {
                let event = by_record.get(&(record.id, stage.id)).copied();
                StageMark {
                    stage_id: stage.id,
                    stage_name: stage.name.clone(),
                    progress: progress_for(stage, current, event),
                    score: event.and_then(|e| e.ai_score),
                }
            })
            .collect();

        let Some(column) = current
            .and_then(|current| columns.iter_mut().find(|col| col.stage.id == current.id))
        else {
            continue;
        };
        column.candidates.push(BoardCard {
            record_id: record.id,
            candidate_id: record.candidate_id,
            status: record.status,
            ai_score: record.ai_score,
            resume_url: record.resume_url.clone(),
            applied_at: record.applied_at,
            updated_at: record.updated_at,
            stages,
        });
        total_candidates += 1;
    }

    for column in &mut columns {
        column
            .candidates
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.record_id.cmp(&b.record_id)));
    }

    PipelineBoard {
        job_id,
        total_candidates,
        columns,
    }
}
