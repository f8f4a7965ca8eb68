//! HTTP API for the Eco tutor.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness probe
//! - `GET /api/chat/session/:assignment_id` - Open (or resume) a chat
//! - `POST /api/chat/message` - Submit a student turn
//! - `GET /api/assignments/student` - Assignments with the caller's progress
//! - `GET /api/assignments/professor` - The caller's assignments with stats
//! - `POST /api/assignments` - Create an assignment
//! - `GET /api/assignments/:id` - One assignment (with sessions for its owner)
//! - `PUT /api/assignments/:id` - Update an assignment
//! - `DELETE /api/assignments/:id` - Delete an assignment without sessions
//! - `GET /api/assignments/:id/stats` - Assignment statistics
//! - `GET /api/sessions/:id` - Review a session
//! - `PUT /api/sessions/:id/grade` - Grade a session
//! - `GET /api/sessions/:id/transcript` - Markdown transcript
//!
//! Every `/api` route reads the caller from the gateway headers described in
//! [`crate::auth`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use eco_tutor::{create_router, AppState, Config, GeminiGenerator, MemoryStore};
//!
//! # async fn example() -> eco_tutor::Result<()> {
//! let config = Config::default();
//! let generator = GeminiGenerator::from_settings(&config.gemini)?;
//! let state = AppState::new(config, Arc::new(MemoryStore::new()), Arc::new(generator));
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::{require_gateway_token, Identity, Role};
use crate::config::Config;
use crate::controller::{SessionController, TurnOutcome};
use crate::error::TutorError;
use crate::generator::TurnGenerator;
use crate::review::{
    AssignmentDetail, AssignmentStats, AssignmentUpdate, GradeInput, NewAssignment,
    ProfessorAssignment, Reviewer, StudentAssignment,
};
use crate::session::{Assignment, ChatSessionView, Grade};
use crate::store::TutorStore;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /api/chat/message`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Session to post into.
    pub chat_session_id: Uuid,
    /// The student's text.
    pub text: String,
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: String,
    /// Server time.
    pub timestamp: DateTime<Utc>,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Students blocking an assignment deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_count: Option<usize>,
}

/// Response body for `DELETE /api/assignments/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedResponse {
    /// Confirmation message.
    pub message: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared state for the HTTP handlers.
#[derive(Debug)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,
    /// Runs student turns.
    pub controller: Arc<SessionController>,
    /// Assignment and review operations.
    pub reviewer: Reviewer,
}

impl AppState {
    /// Wires a controller and reviewer over one store.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn TutorStore>,
        generator: Arc<dyn TurnGenerator>,
    ) -> Self {
        let controller = SessionController::new(Arc::clone(&store), generator, &config);
        Self {
            config,
            controller: Arc::new(controller),
            reviewer: Reviewer::new(store),
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error returned by handlers and extractors.
#[derive(Debug)]
pub struct ApiError(TutorError);

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// HTTP status for the wrapped error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TutorError::Validation { .. } | TutorError::AssignmentInUse { .. } => {
                StatusCode::BAD_REQUEST
            }
            TutorError::NotFound { .. } => StatusCode::NOT_FOUND,
            TutorError::AccessDenied => StatusCode::FORBIDDEN,
            TutorError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            "Internal server error".to_string()
        } else {
            if status == StatusCode::FORBIDDEN {
                warn!("Access denied");
            }
            self.0.to_string()
        };

        let student_count = match &self.0 {
            TutorError::AssignmentInUse { student_count } => Some(*student_count),
            _ => None,
        };
        let body = Json(ErrorResponse {
            error: message,
            student_count,
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints.
///
/// The router carries:
/// - `/health` outside of authentication
/// - All other routes under `/api`, behind the gateway token check
/// - CORS middleware for the browser frontend
/// - Tracing middleware for request logging
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/chat/session/:assignment_id", get(handle_open_session))
        .route("/chat/message", post(handle_send_message))
        .route("/assignments", post(handle_create_assignment))
        .route("/assignments/student", get(handle_student_assignments))
        .route("/assignments/professor", get(handle_professor_assignments))
        .route(
            "/assignments/:id",
            get(handle_get_assignment)
                .put(handle_update_assignment)
                .delete(handle_delete_assignment),
        )
        .route("/assignments/:id/stats", get(handle_assignment_stats))
        .route("/sessions/:id", get(handle_review_session))
        .route("/sessions/:id/grade", put(handle_grade_session))
        .route("/sessions/:id/transcript", get(handle_transcript))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_gateway_token,
        ));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

/// Handler for `GET /api/chat/session/:assignment_id`.
async fn handle_open_session(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<Json<ChatSessionView>> {
    let student_id = identity.require(Role::Student)?;
    let view = state
        .controller
        .get_or_create_session(student_id, assignment_id)
        .await?;
    Ok(Json(view))
}

/// Handler for `POST /api/chat/message`.
async fn handle_send_message(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Json<TurnOutcome>> {
    let student_id = identity.require(Role::Student)?;
    let outcome = state
        .controller
        .submit_user_turn(student_id, request.chat_session_id, &request.text)
        .await?;
    Ok(Json(outcome))
}

async fn handle_student_assignments(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> ApiResult<Json<Vec<StudentAssignment>>> {
    let student_id = identity.require(Role::Student)?;
    Ok(Json(state.reviewer.student_assignments(student_id).await?))
}

async fn handle_professor_assignments(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> ApiResult<Json<Vec<ProfessorAssignment>>> {
    let professor_id = identity.require(Role::Professor)?;
    Ok(Json(state.reviewer.professor_assignments(professor_id).await?))
}

async fn handle_create_assignment(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(request): Json<NewAssignment>,
) -> ApiResult<(StatusCode, Json<Assignment>)> {
    let professor_id = identity.require(Role::Professor)?;
    let assignment = state
        .reviewer
        .create_assignment(professor_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// Handler for `GET /api/assignments/:id`.
///
/// Open to both roles; only the owning professor gets `chatSessions`.
async fn handle_get_assignment(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<Json<AssignmentDetail>> {
    let detail = state.reviewer.assignment(&identity, assignment_id).await?;
    Ok(Json(detail))
}

async fn handle_update_assignment(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(assignment_id): Path<Uuid>,
    Json(update): Json<AssignmentUpdate>,
) -> ApiResult<Json<Assignment>> {
    let professor_id = identity.require(Role::Professor)?;
    let assignment = state
        .reviewer
        .update_assignment(professor_id, assignment_id, update)
        .await?;
    Ok(Json(assignment))
}

async fn handle_delete_assignment(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    let professor_id = identity.require(Role::Professor)?;
    state
        .reviewer
        .delete_assignment(professor_id, assignment_id)
        .await?;
    Ok(Json(DeletedResponse {
        message: "Assignment deleted successfully".to_string(),
    }))
}

async fn handle_assignment_stats(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<Json<AssignmentStats>> {
    let professor_id = identity.require(Role::Professor)?;
    let stats = state
        .reviewer
        .assignment_stats(professor_id, assignment_id)
        .await?;
    Ok(Json(stats))
}

async fn handle_review_session(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ChatSessionView>> {
    let professor_id = identity.require(Role::Professor)?;
    let view = state
        .reviewer
        .review_session(professor_id, session_id)
        .await?;
    Ok(Json(view))
}

async fn handle_grade_session(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(session_id): Path<Uuid>,
    Json(input): Json<GradeInput>,
) -> ApiResult<Json<Grade>> {
    let professor_id = identity.require(Role::Professor)?;
    let grade = state
        .reviewer
        .grade_session(professor_id, session_id, input)
        .await?;
    Ok(Json(grade))
}

/// Handler for `GET /api/sessions/:id/transcript`.
///
/// Responds with Markdown as a file download.
async fn handle_transcript(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Response> {
    let professor_id = identity.require(Role::Professor)?;
    let export = state.reviewer.transcript(professor_id, session_id).await?;
    let headers = [
        (
            header::CONTENT_TYPE,
            "text/markdown; charset=utf-8".to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export.file_name),
        ),
    ];
    Ok((headers, export.markdown).into_response())
}

// ============================================================================
// Tests
// ============================================================================
