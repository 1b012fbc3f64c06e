use serde::Serialize;

pub mod board;
pub mod health;
pub mod interview;
pub mod pipeline;

/// Success envelope: `{"success": true, ...payload}`.
#[derive(Debug, Serialize)]
pub struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    payload: T,
}

impl<T: Serialize> Success<T> {
    pub fn new(payload: T) -> Self {
        Self {
            success: true,
            payload,
        }
    }
}
