pub mod event;
pub mod invitation;
pub mod record;
pub mod response;
pub mod stage;

pub use event::{EventDraft, EventStatus, StageEvent};
pub use invitation::{EmailStatus, Invitation, NewInvitation, generate_token};
pub use record::{CandidateStatus, PipelineRecord, RecordContext};
pub use response::{AssessmentQuestion, InterviewResponse, PublicQuestion, ResponseCompletion};
pub use stage::{Stage, StageCatalog};
