use serde::{Deserialize, Serialize};

/// One named step of the interview sequence (`interview_stages`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub name: String,
    pub order: i32,
    pub is_ai_automated: bool,
}

impl Stage {
    pub fn new(id: i64, name: &str, order: i32, is_ai_automated: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            order,
            is_ai_automated,
        }
    }
}

/// Stages sorted by `order`, which is unique across the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCatalog {
    stages: Vec<Stage>,
}

impl StageCatalog {
    pub fn new(mut stages: Vec<Stage>) -> Self {
        stages.sort_by_key(|stage| stage.order);
        stages.dedup_by_key(|stage| stage.order);
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn first(&self) -> Option<&Stage> {
        self.stages.first()
    }

    pub fn get(&self, stage_id: i64) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.id == stage_id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|stage| stage.name.eq_ignore_ascii_case(name))
    }

    /// Resolves a record's current stage; a missing id means the first stage.
    pub fn current(&self, current_stage_id: Option<i64>) -> Option<&Stage> {
        match current_stage_id {
            Some(id) => self.get(id),
            None => self.first(),
        }
    }

    pub fn next_after(&self, stage_id: i64) -> Option<&Stage> {
        let position = self.stages.iter().position(|stage| stage.id == stage_id)?;
        self.stages.get(position + 1)
    }

    /// Stages at or after `order`, in catalog order.
    pub fn from_order(&self, order: i32) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(move |stage| stage.order >= order)
    }
}
