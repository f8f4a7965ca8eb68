//! Assignment management and professor review.
//!
//! Everything around the chat itself: authoring assignments, listing them with
//! progress or statistics, reviewing a session, grading it and exporting its
//! transcript. Every professor operation checks that the caller owns the
//! assignment involved.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use eco_report::{
    ArticleInfo, Citation, CriterionScore, GradeSummary, MarkdownGenerator, Speaker,
    TranscriptEntry, TranscriptReport,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Identity, Role};
use crate::catalog::MAX_ARTICLE_BYTES;
use crate::error::{Result, TutorError};
use crate::session::{
    Article, Assignment, ChatSessionView, Grade, GradingRubric, RubricScore, Sender, Session,
};
use crate::stage::Stage;
use crate::store::TutorStore;

/// Longest accepted assignment title, in characters.
pub const MAX_TITLE_CHARS: usize = 255;

// ============================================================================
// Requests
// ============================================================================

/// Body of an assignment creation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssignment {
    /// Assignment title.
    pub title: String,
    /// Instructions for students.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional deadline.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Optional grading rubric.
    #[serde(default)]
    pub grading_rubric: Option<GradingRubric>,
    /// The article to discuss.
    pub article: Article,
}

/// Body of an assignment update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentUpdate {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New instructions.
    #[serde(default)]
    pub description: Option<String>,
    /// New deadline.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// New grading rubric.
    #[serde(default)]
    pub grading_rubric: Option<GradingRubric>,
    /// Replacement article.
    #[serde(default)]
    pub article: Option<Article>,
}

/// Body of a grading request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeInput {
    /// Overall score.
    #[serde(default)]
    pub overall_score: Option<f64>,
    /// Written feedback.
    #[serde(default)]
    pub feedback: Option<String>,
    /// Per-criterion scores.
    #[serde(default)]
    pub rubric_scores: Option<Vec<RubricScore>>,
}

// ============================================================================
// Responses
// ============================================================================

/// A student's progress on one assignment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    /// The student's session.
    pub chat_session_id: Uuid,
    /// Current stage.
    pub current_stage: Stage,
    /// Student turns so far.
    pub user_message_count: u32,
    /// Last student activity.
    pub last_activity_at: DateTime<Utc>,
    /// Whether a professor has graded the session.
    pub has_grade: bool,
    /// The grade, if any.
    pub grade: Option<Grade>,
}

/// An assignment as listed for a student.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAssignment {
    /// The assignment.
    #[serde(flatten)]
    pub assignment: Assignment,
    /// The caller's progress, absent until they open the chat.
    pub student_progress: Option<StudentProgress>,
}

/// Number of sessions currently in each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StageDistribution {
    /// Sessions in [`Stage::Comprehension`].
    pub comprehension: usize,
    /// Sessions in [`Stage::Evidence`].
    pub evidence: usize,
    /// Sessions in [`Stage::Analysis`].
    pub analysis: usize,
    /// Sessions in [`Stage::Advanced`].
    pub advanced: usize,
}

impl StageDistribution {
    fn count(&mut self, stage: Stage) {
        let slot = match stage {
            Stage::Comprehension => &mut self.comprehension,
            Stage::Evidence => &mut self.evidence,
            Stage::Analysis => &mut self.analysis,
            Stage::Advanced => &mut self.advanced,
        };
        *slot += 1;
    }
}

/// Per-student row of the assignment statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetail {
    /// The student.
    pub student_id: Uuid,
    /// Their session.
    pub chat_session_id: Uuid,
    /// All messages in the session, greeting included.
    pub message_count: usize,
    /// Current stage.
    pub current_stage: Stage,
    /// Last student activity.
    pub last_activity: DateTime<Utc>,
    /// Whether the session is graded.
    pub has_grade: bool,
    /// Overall score, if graded with one.
    pub score: Option<f64>,
}

/// Aggregate statistics for one assignment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentStats {
    /// Students who opened the chat.
    pub total_students: usize,
    /// Sessions with a grade.
    pub students_graded: usize,
    /// Mean overall score of graded sessions that have one.
    pub average_score: Option<f64>,
    /// Mean message count per session, 0 without sessions.
    pub average_messages: f64,
    /// Sessions per stage.
    pub stage_distribution: StageDistribution,
    /// One row per session.
    pub student_details: Vec<StudentDetail>,
}

/// An assignment as listed for its professor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfessorAssignment {
    /// The assignment.
    #[serde(flatten)]
    pub assignment: Assignment,
    /// Its statistics.
    pub stats: AssignmentStats,
}

/// A session as listed for the professor who owns its assignment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// The session.
    #[serde(flatten)]
    pub session: Session,
    /// Its grade, if any.
    pub grade: Option<Grade>,
}

/// One assignment. The owning professor also sees its sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDetail {
    /// The assignment.
    #[serde(flatten)]
    pub assignment: Assignment,
    /// Sessions on the assignment, present only for its owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_sessions: Option<Vec<SessionSummary>>,
}

/// A rendered transcript ready to download.
#[derive(Debug, Clone)]
pub struct TranscriptExport {
    /// Suggested file name, including the `.md` extension.
    pub file_name: String,
    /// Markdown body.
    pub markdown: String,
}

// ============================================================================
// Reviewer
// ============================================================================

/// Assignment and review operations over a [`TutorStore`].
#[derive(Clone)]
pub struct Reviewer {
    store: Arc<dyn TutorStore>,
}

impl std::fmt::Debug for Reviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reviewer").finish_non_exhaustive()
    }
}

impl Reviewer {
    /// Creates a reviewer over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TutorStore>) -> Self {
        Self { store }
    }

    /// Creates an assignment owned by `professor_id`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Validation` for a bad title, an empty or oversized
    /// article, or a rubric criterion without positive points.
    pub async fn create_assignment(
        &self,
        professor_id: Uuid,
        request: NewAssignment,
    ) -> Result<Assignment> {
        validate_new_assignment(&request)?;

        let assignment = Assignment {
            id: Uuid::new_v4(),
            professor_id,
            title: request.title.trim().to_string(),
            description: request.description.unwrap_or_default(),
            due_date: request.due_date,
            grading_rubric: request.grading_rubric,
            article: request.article,
        };
        self.store.insert_assignment(assignment.clone()).await?;
        info!(
            assignment_id = %assignment.id,
            professor_id = %professor_id,
            title = %assignment.title,
            "Assignment created"
        );
        Ok(assignment)
    }

    /// Looks up one assignment for any signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::NotFound` for an unknown assignment.
    pub async fn assignment(
        &self,
        viewer: &Identity,
        assignment_id: Uuid,
    ) -> Result<AssignmentDetail> {
        let assignment = self
            .store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| TutorError::not_found("Assignment", assignment_id))?;

        let owner = viewer.role == Role::Professor && viewer.user_id == assignment.professor_id;
        let chat_sessions = if owner {
            let sessions = self.store.list_sessions(assignment_id).await?;
            let mut summaries = Vec::with_capacity(sessions.len());
            for session in sessions {
                let grade = self.store.get_grade(session.id).await?;
                summaries.push(SessionSummary { session, grade });
            }
            Some(summaries)
        } else {
            None
        };
        Ok(AssignmentDetail {
            assignment,
            chat_sessions,
        })
    }

    /// Updates an assignment the professor owns.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::NotFound` for an unknown assignment,
    /// `TutorError::AccessDenied` when the caller does not own it and
    /// `TutorError::Validation` when the result would not be a valid
    /// assignment.
    pub async fn update_assignment(
        &self,
        professor_id: Uuid,
        assignment_id: Uuid,
        update: AssignmentUpdate,
    ) -> Result<Assignment> {
        let mut assignment = self.owned_assignment(professor_id, assignment_id).await?;
        if let Some(title) = update.title {
            assignment.title = title.trim().to_string();
        }
        if let Some(description) = update.description {
            assignment.description = description;
        }
        if update.due_date.is_some() {
            assignment.due_date = update.due_date;
        }
        if update.grading_rubric.is_some() {
            assignment.grading_rubric = update.grading_rubric;
        }
        if let Some(article) = update.article {
            assignment.article = article;
        }
        validate_assignment(
            &assignment.title,
            &assignment.article,
            assignment.grading_rubric.as_ref(),
        )?;

        self.store.update_assignment(assignment.clone()).await?;
        info!(
            assignment_id = %assignment_id,
            professor_id = %professor_id,
            "Assignment updated"
        );
        Ok(assignment)
    }

    /// Deletes an assignment the professor owns.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::NotFound` for an unknown assignment,
    /// `TutorError::AccessDenied` when the caller does not own it and
    /// `TutorError::AssignmentInUse` once any student has opened a session.
    pub async fn delete_assignment(&self, professor_id: Uuid, assignment_id: Uuid) -> Result<()> {
        self.owned_assignment(professor_id, assignment_id).await?;
        if let Err(e) = self.store.delete_assignment(assignment_id).await {
            if let TutorError::AssignmentInUse { student_count } = &e {
                warn!(
                    assignment_id = %assignment_id,
                    student_count = *student_count,
                    "Refused to delete assignment with student activity"
                );
            }
            return Err(e);
        }
        info!(
            assignment_id = %assignment_id,
            professor_id = %professor_id,
            "Assignment deleted"
        );
        Ok(())
    }

    /// Lists every assignment with the student's own progress.
    pub async fn student_assignments(&self, student_id: Uuid) -> Result<Vec<StudentAssignment>> {
        let assignments = self.store.list_assignments().await?;
        let mut listed = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let progress = match self.store.find_session(student_id, assignment.id).await? {
                Some(session) => {
                    let grade = self.store.get_grade(session.id).await?;
                    Some(StudentProgress {
                        chat_session_id: session.id,
                        current_stage: session.current_stage,
                        user_message_count: session.user_message_count,
                        last_activity_at: session.last_activity_at,
                        has_grade: grade.is_some(),
                        grade,
                    })
                }
                None => None,
            };
            listed.push(StudentAssignment {
                assignment,
                student_progress: progress,
            });
        }
        Ok(listed)
    }

    /// Lists the professor's own assignments with statistics.
    pub async fn professor_assignments(
        &self,
        professor_id: Uuid,
    ) -> Result<Vec<ProfessorAssignment>> {
        let assignments = self.store.list_assignments().await?;
        let mut listed = Vec::new();
        for assignment in assignments
            .into_iter()
            .filter(|a| a.professor_id == professor_id)
        {
            let stats = self.compute_stats(assignment.id).await?;
            listed.push(ProfessorAssignment { assignment, stats });
        }
        Ok(listed)
    }

    /// Statistics for an assignment the professor owns.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::NotFound` for an unknown assignment and
    /// `TutorError::AccessDenied` when the caller does not own it.
    pub async fn assignment_stats(
        &self,
        professor_id: Uuid,
        assignment_id: Uuid,
    ) -> Result<AssignmentStats> {
        self.owned_assignment(professor_id, assignment_id).await?;
        self.compute_stats(assignment_id).await
    }

    /// Full view of a session on one of the professor's assignments.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::NotFound` for an unknown session and
    /// `TutorError::AccessDenied` when the caller does not own the assignment.
    pub async fn review_session(
        &self,
        professor_id: Uuid,
        session_id: Uuid,
    ) -> Result<ChatSessionView> {
        let (session, assignment) = self.owned_session(professor_id, session_id).await?;
        let messages = self.store.messages(session.id).await?;
        let grade = self.store.get_grade(session.id).await?;
        Ok(ChatSessionView {
            session,
            messages,
            assignment,
            grade,
        })
    }

    /// Grades a session, replacing any previous grade.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Validation` for a negative or non-finite score or
    /// a rubric score outside `0..=maxPoints`, before anything is stored.
    pub async fn grade_session(
        &self,
        professor_id: Uuid,
        session_id: Uuid,
        input: GradeInput,
    ) -> Result<Grade> {
        validate_grade(&input)?;
        let (session, _) = self.owned_session(professor_id, session_id).await?;

        let grade = Grade {
            session_id: session.id,
            professor_id,
            overall_score: input.overall_score,
            feedback: input.feedback,
            rubric_scores: input.rubric_scores,
            graded_at: Utc::now(),
        };
        self.store.set_grade(grade.clone()).await?;
        info!(
            session_id = %session_id,
            professor_id = %professor_id,
            overall_score = ?grade.overall_score,
            "Session graded"
        );
        Ok(grade)
    }

    /// Renders a session transcript as Markdown.
    ///
    /// # Errors
    ///
    /// Same access rules as [`Reviewer::review_session`].
    pub async fn transcript(
        &self,
        professor_id: Uuid,
        session_id: Uuid,
    ) -> Result<TranscriptExport> {
        let view = self.review_session(professor_id, session_id).await?;
        let report = transcript_report(&view);
        Ok(TranscriptExport {
            file_name: format!("{}.md", report.file_stem()),
            markdown: MarkdownGenerator::new(&report).generate(),
        })
    }

    async fn owned_assignment(&self, professor_id: Uuid, assignment_id: Uuid) -> Result<Assignment> {
        let assignment = self
            .store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| TutorError::not_found("Assignment", assignment_id))?;
        if assignment.professor_id != professor_id {
            return Err(TutorError::AccessDenied);
        }
        Ok(assignment)
    }

    async fn owned_session(
        &self,
        professor_id: Uuid,
        session_id: Uuid,
    ) -> Result<(Session, Assignment)> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| TutorError::not_found("Chat session", session_id))?;
        let assignment = self
            .store
            .get_assignment(session.assignment_id)
            .await?
            .ok_or_else(|| TutorError::not_found("Chat session", session_id))?;
        if assignment.professor_id != professor_id {
            return Err(TutorError::AccessDenied);
        }
        Ok((session, assignment))
    }

    async fn compute_stats(&self, assignment_id: Uuid) -> Result<AssignmentStats> {
        let sessions = self.store.list_sessions(assignment_id).await?;
        let mut details = Vec::with_capacity(sessions.len());
        let mut distribution = StageDistribution::default();
        let mut total_messages = 0usize;

        for session in &sessions {
            let message_count = self.store.messages(session.id).await?.len();
            let grade = self.store.get_grade(session.id).await?;
            total_messages += message_count;
            distribution.count(session.current_stage);
            details.push(StudentDetail {
                student_id: session.student_id,
                chat_session_id: session.id,
                message_count,
                current_stage: session.current_stage,
                last_activity: session.last_activity_at,
                has_grade: grade.is_some(),
                score: grade.and_then(|g| g.overall_score),
            });
        }

        let scores: Vec<f64> = details.iter().filter_map(|d| d.score).collect();
        Ok(AssignmentStats {
            total_students: sessions.len(),
            students_graded: details.iter().filter(|d| d.has_grade).count(),
            average_score: mean(&scores),
            average_messages: ratio(total_messages, sessions.len()),
            stage_distribution: distribution,
            student_details: details,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

#[allow(clippy::cast_precision_loss)]
fn ratio(total: usize, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_new_assignment(request: &NewAssignment) -> Result<()> {
    validate_assignment(
        &request.title,
        &request.article,
        request.grading_rubric.as_ref(),
    )
}

fn validate_assignment(
    title: &str,
    article: &Article,
    grading_rubric: Option<&GradingRubric>,
) -> Result<()> {
    let title_chars = title.trim().chars().count();
    if title_chars == 0 {
        return Err(TutorError::validation("title", "must not be empty"));
    }
    if title_chars > MAX_TITLE_CHARS {
        return Err(TutorError::validation(
            "title",
            format!("must be at most {MAX_TITLE_CHARS} characters"),
        ));
    }
    validate_article(article)?;

    if let Some(rubric) = grading_rubric {
        for criterion in &rubric.criteria {
            if criterion.name.trim().is_empty() {
                return Err(TutorError::validation(
                    "gradingRubric.criteria.name",
                    "must not be empty",
                ));
            }
            if !criterion.max_points.is_finite() || criterion.max_points <= 0.0 {
                return Err(TutorError::validation(
                    "gradingRubric.criteria.maxPoints",
                    format!("must be positive for '{}'", criterion.name),
                ));
            }
        }
    }
    Ok(())
}

/// Checks the fields every stored article needs.
pub(crate) fn validate_article(article: &Article) -> Result<()> {
    if article.title.trim().is_empty() {
        return Err(TutorError::validation("article.title", "must not be empty"));
    }
    if article.content.trim().is_empty() {
        return Err(TutorError::validation("article.content", "must not be empty"));
    }
    if article.content.len() > MAX_ARTICLE_BYTES {
        return Err(TutorError::validation(
            "article.content",
            format!("must be at most {} KB", MAX_ARTICLE_BYTES / 1024),
        ));
    }
    Ok(())
}

fn validate_grade(input: &GradeInput) -> Result<()> {
    if let Some(score) = input.overall_score {
        if !score.is_finite() || score < 0.0 {
            return Err(TutorError::validation(
                "overallScore",
                "must be a non-negative number",
            ));
        }
    }
    for item in input.rubric_scores.iter().flatten() {
        if !item.max_points.is_finite() || item.max_points <= 0.0 {
            return Err(TutorError::validation(
                "rubricScores.maxPoints",
                format!("must be positive for '{}'", item.criterion),
            ));
        }
        if !item.score.is_finite() || item.score < 0.0 || item.score > item.max_points {
            return Err(TutorError::validation(
                "rubricScores.score",
                format!(
                    "must be between 0 and {} for '{}'",
                    item.max_points, item.criterion
                ),
            ));
        }
    }
    Ok(())
}

// ============================================================================
// Transcript conversion
// ============================================================================

/// Converts a session view into a transcript report.
#[must_use]
pub fn transcript_report(view: &ChatSessionView) -> TranscriptReport {
    let article = &view.assignment.article;
    TranscriptReport {
        assignment_title: view.assignment.title.clone(),
        article: ArticleInfo {
            title: article.title.clone(),
            author: article.author.clone(),
            year: article.year,
        },
        session_id: view.session.id.to_string(),
        student_id: view.session.student_id.to_string(),
        stage: view.session.current_stage.title().to_string(),
        user_message_count: view.session.user_message_count,
        started_at: view.session.started_at,
        last_activity_at: view.session.last_activity_at,
        entries: view
            .messages
            .iter()
            .map(|m| TranscriptEntry {
                ordinal: m.ordinal,
                speaker: match m.sender {
                    Sender::User => Speaker::Student,
                    Sender::Ai => Speaker::Tutor,
                },
                text: m.text.clone(),
                citations: m
                    .sources
                    .iter()
                    .flatten()
                    .map(|s| Citation {
                        uri: s.uri.clone(),
                        title: s.title.clone(),
                    })
                    .collect(),
                at: m.created_at,
            })
            .collect(),
        grade: view.grade.as_ref().map(|g| GradeSummary {
            overall_score: g.overall_score,
            feedback: g.feedback.clone(),
            rubric: g
                .rubric_scores
                .iter()
                .flatten()
                .map(|r| CriterionScore {
                    criterion: r.criterion.clone(),
                    score: r.score,
                    max_points: r.max_points,
                })
                .collect(),
            graded_at: g.graded_at,
        }),
    }
}
