//! Shared core of the hireflow services: the interview pipeline state machine,
//! its storage, and the AI gateway and email clients it calls.

pub mod config;
pub mod db;
pub mod llm;
pub mod logging;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod store;

pub use config::PipelineConfig;
pub use pipeline::{PipelineError, PipelineService};
pub use store::{PipelineStore, StoreError};
