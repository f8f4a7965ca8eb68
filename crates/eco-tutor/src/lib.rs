//! Eco Tutor
//!
//! Stage-based Socratic tutoring over research articles: session storage,
//! the stage policy, the AI turn generator, assignment review and the HTTP API.

pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod gemini;
pub mod generator;
pub mod review;
pub mod session;
pub mod stage;
pub mod store;

pub use api::{
    create_router, ApiError, AppState, DeletedResponse, ErrorResponse, HealthResponse,
    SendMessageRequest,
};
pub use auth::{Identity, Role};
pub use catalog::{Catalog, MAX_ARTICLE_BYTES};
pub use config::{Config, GeminiSettings};
pub use controller::{greeting, transition_announcement, SessionController, TurnOutcome};
pub use error::{LlmErrorKind, Result, TutorError};
pub use gemini::GeminiGenerator;
pub use generator::{TurnGenerator, TurnReply, TurnRequest, FALLBACK_REPLY};
pub use review::{
    transcript_report, AssignmentDetail, AssignmentStats, AssignmentUpdate, GradeInput,
    NewAssignment, ProfessorAssignment, Reviewer, SessionSummary, StageDistribution,
    StudentAssignment, StudentDetail, StudentProgress, TranscriptExport,
};
pub use session::{
    Article, Assignment, ChatSessionView, Grade, GradingRubric, Message, NewMessage, Progress,
    RubricCriterion, RubricScore, Sender, Session, Source,
};
pub use stage::{next_stage, Stage, STAGE_ADVANCE_INTERVAL};
pub use store::{MemoryStore, TutorStore};
