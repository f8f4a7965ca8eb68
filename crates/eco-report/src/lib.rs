//! Eco Transcript Reports
//!
//! This crate turns a tutoring session into a shareable transcript. Reports
//! can be serialized to JSON for archiving or rendered to Markdown for a
//! professor to read alongside the grade.
//!
//! # Types
//!
//! - [`TranscriptReport`] - One session: assignment, article, progress and turns
//! - [`TranscriptEntry`] - A single turn of the conversation
//! - [`GradeSummary`] - The professor's grade, if the session was graded
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Compact or pretty JSON output
//! - [`MarkdownGenerator`] - Human-readable Markdown output
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use eco_report::{ArticleInfo, MarkdownGenerator, Speaker, TranscriptEntry, TranscriptReport};
//!
//! let report = TranscriptReport {
//!     assignment_title: "Week 2: Connectivity".to_string(),
//!     article: ArticleInfo {
//!         title: "Landscape Connectivity".to_string(),
//!         author: "Taylor et al.".to_string(),
//!         year: 1993,
//!     },
//!     session_id: "s-1".to_string(),
//!     student_id: "student-1".to_string(),
//!     stage: "Comprehension Building".to_string(),
//!     user_message_count: 1,
//!     started_at: Utc::now(),
//!     last_activity_at: Utc::now(),
//!     entries: vec![TranscriptEntry {
//!         ordinal: 0,
//!         speaker: Speaker::Tutor,
//!         text: "Hello!".to_string(),
//!         citations: vec![],
//!         at: Utc::now(),
//!     }],
//!     grade: None,
//! };
//!
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Transcript: Week 2: Connectivity"));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Transcript
// ============================================================================

/// Who spoke a transcript entry.
///
/// Local to this crate so it does not depend on the tutor's session types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The student.
    Student,
    /// The AI tutor.
    Tutor,
}

impl Speaker {
    /// Label used in rendered transcripts.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Student => "Student",
            Self::Tutor => "Tutor",
        }
    }
}

/// A web source cited by the tutor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Link target.
    pub uri: String,
    /// Link text.
    pub title: String,
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Position in the transcript.
    pub ordinal: u32,
    /// Author of the turn.
    pub speaker: Speaker,
    /// Turn text. Tutor text is Markdown; student text is plain.
    pub text: String,
    /// Sources backing a tutor turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// When the turn was stored.
    pub at: DateTime<Utc>,
}

/// Bibliographic details of the discussed article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleInfo {
    /// Article title.
    pub title: String,
    /// Author line.
    pub author: String,
    /// Publication year.
    pub year: i32,
}

/// Score for one rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// Criterion name.
    pub criterion: String,
    /// Points awarded.
    pub score: f64,
    /// Points available.
    pub max_points: f64,
}

/// The professor's grade for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSummary {
    /// Overall score, if given.
    pub overall_score: Option<f64>,
    /// Written feedback, if given.
    pub feedback: Option<String>,
    /// Per-criterion scores.
    #[serde(default)]
    pub rubric: Vec<CriterionScore>,
    /// When the grade was written.
    pub graded_at: DateTime<Utc>,
}

/// A complete session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptReport {
    /// Title of the assignment.
    pub assignment_title: String,
    /// The article discussed.
    pub article: ArticleInfo,
    /// Session identifier.
    pub session_id: String,
    /// Student identifier.
    pub student_id: String,
    /// Title of the stage the session ended in.
    pub stage: String,
    /// Number of student turns.
    pub user_message_count: u32,
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Last student activity.
    pub last_activity_at: DateTime<Utc>,
    /// Turns ordered by ordinal.
    pub entries: Vec<TranscriptEntry>,
    /// Grade, if any.
    pub grade: Option<GradeSummary>,
}

impl TranscriptReport {
    /// Number of turns spoken by `speaker`.
    #[must_use]
    pub fn turns_by(&self, speaker: Speaker) -> usize {
        self.entries.iter().filter(|e| e.speaker == speaker).count()
    }

    /// Total number of citations across all tutor turns.
    #[must_use]
    pub fn citation_count(&self) -> usize {
        self.entries.iter().map(|e| e.citations.len()).sum()
    }

    /// A file-name-safe stem such as `transcript-week-2-connectivity-3f2a9c1d`.
    ///
    /// The assignment title is lowercased and every run of characters other
    /// than ASCII letters and digits becomes a single hyphen. The first eight
    /// characters of the session id keep stems unique per student.
    #[must_use]
    pub fn file_stem(&self) -> String {
        let slug = slugify(&self.assignment_title);
        let short_id: String = self
            .session_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(8)
            .collect();
        match (slug.is_empty(), short_id.is_empty()) {
            (true, true) => "transcript".to_string(),
            (true, false) => format!("transcript-{short_id}"),
            (false, true) => format!("transcript-{slug}"),
            (false, false) => format!("transcript-{slug}-{short_id}"),
        }
    }
}

/// Lowercases `text` and collapses non-alphanumeric runs into hyphens.
fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let Ok(re) = Regex::new(r"[^a-z0-9]+") else {
        return String::new();
    };
    re.replace_all(&lowered, "-").trim_matches('-').to_string()
}
