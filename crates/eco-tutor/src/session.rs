//! Session, message, assignment and grade records.
//!
//! These are the persisted shapes shared by the store, the controller and the
//! HTTP layer. All of them serialize with camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;

// ============================================================================
// Messages
// ============================================================================

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The student.
    User,
    /// The tutor.
    Ai,
}

/// A web citation attached to an AI message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Link to the cited page.
    pub uri: String,
    /// Page title as reported by the search tool.
    pub title: String,
}

/// One immutable turn in a session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identifier.
    pub id: Uuid,
    /// Owning session.
    #[serde(rename = "chatSessionId")]
    pub session_id: Uuid,
    /// Author of the turn.
    pub sender: Sender,
    /// Message body.
    pub text: String,
    /// Citations, present only on AI messages that used web search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    /// Position in the transcript, gapless from 0.
    pub ordinal: u32,
    /// When the message was stored.
    pub created_at: DateTime<Utc>,
}

/// A message waiting to be appended; the store assigns id and ordinal.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Author of the turn.
    pub sender: Sender,
    /// Message body.
    pub text: String,
    /// Citations, if any.
    pub sources: Option<Vec<Source>>,
}

impl NewMessage {
    /// A student turn.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
            sources: None,
        }
    }

    /// A tutor turn. Empty source lists are stored as absent.
    #[must_use]
    pub fn ai(text: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            sender: Sender::Ai,
            text: text.into(),
            sources: (!sources.is_empty()).then_some(sources),
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// The tutoring conversation of one student on one assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier.
    pub id: Uuid,
    /// The student having the conversation.
    pub student_id: Uuid,
    /// The assignment being discussed.
    pub assignment_id: Uuid,
    /// Current pedagogical stage.
    pub current_stage: Stage,
    /// Number of student turns so far.
    pub user_message_count: u32,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// When the last student turn was recorded.
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Creates a fresh session at the initial stage.
    #[must_use]
    pub fn new(student_id: Uuid, assignment_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            student_id,
            assignment_id,
            current_stage: Stage::default(),
            user_message_count: 0,
            started_at: now,
            last_activity_at: now,
        }
    }
}

/// Session counters written together with a student message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// New value of the student turn counter.
    pub user_message_count: u32,
    /// Stage after applying the stage policy.
    pub stage: Stage,
    /// New last activity timestamp.
    pub at: DateTime<Utc>,
}

// ============================================================================
// Assignments
// ============================================================================

/// The research article a student discusses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Article title.
    pub title: String,
    /// Author line.
    pub author: String,
    /// Publication year.
    pub year: i32,
    /// Full text handed to the tutor.
    pub content: String,
    /// What the student should take away.
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    /// Terms the tutor should reinforce.
    #[serde(default)]
    pub key_concepts: Vec<String>,
}

/// One line of a grading rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricCriterion {
    /// Criterion name.
    pub name: String,
    /// Maximum points for this criterion.
    pub max_points: f64,
    /// What the criterion assesses.
    #[serde(default)]
    pub description: String,
}

/// Rubric a professor grades against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingRubric {
    /// Ordered criteria.
    pub criteria: Vec<RubricCriterion>,
}

/// An article assigned by a professor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Assignment identifier.
    pub id: Uuid,
    /// Owning professor.
    pub professor_id: Uuid,
    /// Assignment title.
    pub title: String,
    /// Instructions for students.
    #[serde(default)]
    pub description: String,
    /// Optional deadline.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Optional grading rubric.
    #[serde(default)]
    pub grading_rubric: Option<GradingRubric>,
    /// The article under discussion.
    pub article: Article,
}

// ============================================================================
// Grades
// ============================================================================

/// Score awarded for one rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricScore {
    /// Name of the criterion.
    pub criterion: String,
    /// Points awarded.
    pub score: f64,
    /// Points available.
    pub max_points: f64,
}

/// A professor's evaluation of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    /// Graded session.
    #[serde(rename = "chatSessionId")]
    pub session_id: Uuid,
    /// Grading professor.
    pub professor_id: Uuid,
    /// Overall score, if given.
    pub overall_score: Option<f64>,
    /// Written feedback, if given.
    pub feedback: Option<String>,
    /// Per-criterion scores, if a rubric was used.
    pub rubric_scores: Option<Vec<RubricScore>>,
    /// When the grade was (last) written.
    pub graded_at: DateTime<Utc>,
}

// ============================================================================
// Views
// ============================================================================

/// A session together with everything a client needs to render it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionView {
    /// Session record.
    #[serde(flatten)]
    pub session: Session,
    /// Transcript ordered by ordinal.
    pub messages: Vec<Message>,
    /// The assignment and its article.
    pub assignment: Assignment,
    /// Grade, once a professor has graded the session.
    pub grade: Option<Grade>,
}
