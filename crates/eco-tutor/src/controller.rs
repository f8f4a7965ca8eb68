//! The session controller.
//!
//! Coordinates a student turn end to end: validation, access checks, the
//! persisted counter and stage update, the AI call with its fallback, the
//! transition announcement, and the tutor's reply. Turns on one session are
//! serialized so every user message is immediately followed by its reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, TutorError};
use crate::generator::{TurnGenerator, TurnReply, TurnRequest, FALLBACK_REPLY};
use crate::session::{Article, ChatSessionView, Message, NewMessage, Progress, Session};
use crate::stage::{next_stage, Stage};
use crate::store::TutorStore;

/// Result of one student turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    /// The stored student message.
    pub user_message: Message,
    /// The stored tutor reply (possibly the fallback).
    pub ai_message: Message,
    /// Stage of the session after this turn.
    pub new_stage: Stage,
}

/// Builds the greeting stored at ordinal 0 of a new session.
#[must_use]
pub fn greeting(tutor_name: &str, article: &Article) -> String {
    format!(
        "Hello! I'm {tutor_name}, your guide for discussing \"{}\". I'm here to help you explore \
the key concepts. What are your initial thoughts after reading the abstract?",
        article.title
    )
}

/// Prefix added to the tutor reply on the turn a session changes stage.
#[must_use]
pub fn transition_announcement(stage: Stage) -> String {
    format!(
        "Great progress! Let's move to the next stage: **{}**. ",
        stage.title()
    )
}

// ============================================================================
// SessionLocks
// ============================================================================

/// Per-session turn locks.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    /// Waits for exclusive turn access to a session.
    pub async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(session_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the entry for a session once nobody holds or waits on it.
    pub async fn release(&self, session_id: Uuid) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(&session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&session_id);
        }
    }

    /// Number of sessions with a live lock entry.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Returns `true` when no session has a live lock entry.
    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

// ============================================================================
// SessionController
// ============================================================================

/// Runs student turns against a store and a turn generator.
pub struct SessionController {
    store: Arc<dyn TutorStore>,
    generator: Arc<dyn TurnGenerator>,
    max_message_chars: usize,
    ai_timeout: Duration,
    tutor_name: Arc<str>,
    locks: Arc<SessionLocks>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("max_message_chars", &self.max_message_chars)
            .field("ai_timeout", &self.ai_timeout)
            .field("tutor_name", &self.tutor_name)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Creates a controller using the limits from `config`.
    #[must_use]
    pub fn new(
        store: Arc<dyn TutorStore>,
        generator: Arc<dyn TurnGenerator>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            generator,
            max_message_chars: config.max_message_chars,
            ai_timeout: Duration::from_secs(config.ai_timeout_secs),
            tutor_name: Arc::from(config.tutor_name.as_str()),
            locks: Arc::default(),
        }
    }

    /// Overrides the AI timeout.
    #[must_use]
    pub const fn with_ai_timeout(mut self, timeout: Duration) -> Self {
        self.ai_timeout = timeout;
        self
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TutorStore> {
        &self.store
    }

    /// Returns the student's session on an assignment, creating it with a
    /// greeting on first access.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::NotFound` if the assignment does not exist.
    pub async fn get_or_create_session(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
    ) -> Result<ChatSessionView> {
        let assignment = self
            .store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| TutorError::not_found("Assignment", assignment_id))?;

        let text = greeting(&self.tutor_name, &assignment.article);
        let (session, created) = self
            .store
            .get_or_create_session(student_id, assignment_id, text)
            .await?;
        if created {
            info!(
                session_id = %session.id,
                student_id = %student_id,
                assignment_id = %assignment_id,
                "Chat session created"
            );
        }

        let messages = self.store.messages(session.id).await?;
        let grade = self.store.get_grade(session.id).await?;
        Ok(ChatSessionView {
            session,
            messages,
            assignment,
            grade,
        })
    }

    /// Records a student turn and the tutor's reply.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Validation` for empty or oversized text (nothing
    /// is stored), `TutorError::NotFound` for an unknown session and
    /// `TutorError::AccessDenied` for another student's session. Generator
    /// failures are not errors; the fallback reply is stored instead.
    ///
    /// Once validated, the turn runs on its own task. Dropping the returned
    /// future does not stop it, so a stored student message always gets its
    /// reply.
    pub async fn submit_user_turn(
        &self,
        student_id: Uuid,
        session_id: Uuid,
        text: &str,
    ) -> Result<TurnOutcome> {
        self.validate_text(text)?;
        self.owned_session(student_id, session_id).await?;

        let turn = Turn {
            store: Arc::clone(&self.store),
            generator: Arc::clone(&self.generator),
            locks: Arc::clone(&self.locks),
            ai_timeout: self.ai_timeout,
            tutor_name: Arc::clone(&self.tutor_name),
            session_id,
            text: text.to_string(),
        };
        tokio::spawn(turn.run()).await.map_err(|e| {
            error!(session_id = %session_id, error = %e, "Turn task failed");
            TutorError::TurnTask(e.to_string())
        })?
    }

    fn validate_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(TutorError::validation("text", "must not be empty"));
        }
        let chars = text.chars().count();
        if chars > self.max_message_chars {
            return Err(TutorError::validation(
                "text",
                format!(
                    "must be at most {} characters (got {chars})",
                    self.max_message_chars
                ),
            ));
        }
        Ok(())
    }

    async fn owned_session(&self, student_id: Uuid, session_id: Uuid) -> Result<Session> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| TutorError::not_found("Chat session", session_id))?;
        if session.student_id != student_id {
            warn!(
                session_id = %session_id,
                student_id = %student_id,
                "Turn rejected for session owned by another student"
            );
            return Err(TutorError::AccessDenied);
        }
        Ok(session)
    }
}

// ============================================================================
// Turn
// ============================================================================

/// One student turn, owning everything it needs to run detached.
struct Turn {
    store: Arc<dyn TutorStore>,
    generator: Arc<dyn TurnGenerator>,
    locks: Arc<SessionLocks>,
    ai_timeout: Duration,
    tutor_name: Arc<str>,
    session_id: Uuid,
    text: String,
}

impl Turn {
    async fn run(self) -> Result<TurnOutcome> {
        let guard = self.locks.acquire(self.session_id).await;
        let outcome = self.steps().await;
        drop(guard);
        self.locks.release(self.session_id).await;
        outcome
    }

    /// Steps run under the session's turn lock.
    async fn steps(&self) -> Result<TurnOutcome> {
        let session_id = self.session_id;
        let text = self.text.as_str();
        // Re-read under the lock so the counter reflects earlier turns.
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| TutorError::not_found("Chat session", session_id))?;
        let assignment = self
            .store
            .get_assignment(session.assignment_id)
            .await?
            .ok_or_else(|| TutorError::not_found("Assignment", session.assignment_id))?;
        let history = self.store.messages(session_id).await?;

        let previous_stage = session.current_stage;
        let count = session.user_message_count.saturating_add(1);
        let stage = next_stage(previous_stage, count);
        let (user_message, _) = self
            .store
            .append_message(
                session_id,
                NewMessage::user(text),
                Some(Progress {
                    user_message_count: count,
                    stage,
                    at: Utc::now(),
                }),
            )
            .await?;

        let request = TurnRequest {
            article: &assignment.article,
            history: &history,
            user_text: text,
            stage,
            tutor_name: &self.tutor_name,
        };
        let reply = self.generate_or_fallback(request).await;

        let advanced = stage != previous_stage;
        let reply_text = if advanced {
            info!(
                session_id = %session_id,
                from = %previous_stage,
                to = %stage,
                user_message_count = count,
                "Stage advanced"
            );
            format!("{}{}", transition_announcement(stage), reply.text)
        } else {
            reply.text
        };

        let (ai_message, _) = self
            .store
            .append_message(session_id, NewMessage::ai(reply_text, reply.sources), None)
            .await?;

        info!(
            session_id = %session_id,
            user_message_count = count,
            stage = %stage,
            ordinal = ai_message.ordinal,
            "Turn recorded"
        );
        Ok(TurnOutcome {
            user_message,
            ai_message,
            new_stage: stage,
        })
    }

    async fn generate_or_fallback(&self, request: TurnRequest<'_>) -> TurnReply {
        let session_id = self.session_id;
        let timeout_secs = self.ai_timeout.as_secs();
        let result = match tokio::time::timeout(self.ai_timeout, self.generator.generate(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(TutorError::ai_timeout(timeout_secs)),
        };
        match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    transient = e.is_transient(),
                    "Turn generation failed, using fallback reply"
                );
                TurnReply::text(FALLBACK_REPLY)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::LlmErrorKind;
    use crate::session::{Assignment, Sender, Source};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies "reply N" and records the stage and history length it saw.
    #[derive(Default)]
    struct EchoGenerator {
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<(Stage, usize)>>,
    }

    #[async_trait]
    impl TurnGenerator for EchoGenerator {
        async fn generate(&self, request: TurnRequest<'_>) -> Result<TurnReply> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen
                .lock()
                .unwrap()
                .push((request.stage, request.history.len()));
            Ok(TurnReply {
                text: format!("reply {n}"),
                sources: vec![Source {
                    uri: "https://example.org".to_string(),
                    title: "Example".to_string(),
                }],
            })
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TurnGenerator for FailingGenerator {
        async fn generate(&self, _request: TurnRequest<'_>) -> Result<TurnReply> {
            Err(TutorError::llm_api_error(LlmErrorKind::Server, "HTTP 503"))
        }
    }

    struct SlowGenerator;

    /// Answers after a fixed delay, well inside the AI timeout.
    struct DelayedGenerator(Duration);

    #[async_trait]
    impl TurnGenerator for DelayedGenerator {
        async fn generate(&self, _request: TurnRequest<'_>) -> Result<TurnReply> {
            tokio::time::sleep(self.0).await;
            Ok(TurnReply::text("worth the wait"))
        }
    }

    #[async_trait]
    impl TurnGenerator for SlowGenerator {
        async fn generate(&self, _request: TurnRequest<'_>) -> Result<TurnReply> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(TurnReply::text("too late"))
        }
    }

    fn assignment() -> Assignment {
        Assignment {
            id: Uuid::new_v4(),
            professor_id: Uuid::new_v4(),
            title: "Fragmentation".to_string(),
            description: String::new(),
            due_date: None,
            grading_rubric: None,
            article: Article {
                title: "Habitat Fragmentation".to_string(),
                author: "Fahrig".to_string(),
                year: 2003,
                content: "Fragmentation per se has weak effects.".to_string(),
                learning_objectives: Vec::new(),
                key_concepts: Vec::new(),
            },
        }
    }

    async fn setup(generator: Arc<dyn TurnGenerator>) -> (SessionController, Assignment) {
        let store = Arc::new(MemoryStore::new());
        let assignment = assignment();
        store.insert_assignment(assignment.clone()).await.unwrap();
        let controller = SessionController::new(store, generator, &Config::default());
        (controller, assignment)
    }

    #[tokio::test]
    async fn test_first_access_creates_greeting() {
        let (controller, assignment) = setup(Arc::new(EchoGenerator::default())).await;
        let student = Uuid::new_v4();

        let view = controller
            .get_or_create_session(student, assignment.id)
            .await
            .unwrap();
        assert_eq!(view.session.current_stage, Stage::Comprehension);
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].sender, Sender::Ai);
        assert!(view.messages[0]
            .text
            .starts_with("Hello! I'm Eco, your guide for discussing \"Habitat Fragmentation\"."));

        let again = controller
            .get_or_create_session(student, assignment.id)
            .await
            .unwrap();
        assert_eq!(again.session.id, view.session.id);
        assert_eq!(again.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_assignment_is_not_found() {
        let (controller, _) = setup(Arc::new(EchoGenerator::default())).await;
        let err = controller
            .get_or_create_session(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Assignment not found");
    }

    #[tokio::test]
    async fn test_third_turn_advances_with_announcement() {
        let generator = Arc::new(EchoGenerator::default());
        let (controller, assignment) = setup(generator.clone()).await;
        let student = Uuid::new_v4();
        let session = controller
            .get_or_create_session(student, assignment.id)
            .await
            .unwrap()
            .session;

        let first = controller
            .submit_user_turn(student, session.id, "What is fragmentation?")
            .await
            .unwrap();
        assert_eq!(first.new_stage, Stage::Comprehension);
        assert_eq!(first.user_message.ordinal, 1);
        assert_eq!(first.ai_message.ordinal, 2);
        assert_eq!(first.ai_message.text, "reply 1");
        assert_eq!(first.ai_message.sources.as_ref().map(Vec::len), Some(1));

        controller
            .submit_user_turn(student, session.id, "Is it the same as habitat loss?")
            .await
            .unwrap();
        let third = controller
            .submit_user_turn(student, session.id, "So loss matters more?")
            .await
            .unwrap();
        assert_eq!(third.new_stage, Stage::Evidence);
        assert_eq!(
            third.ai_message.text,
            "Great progress! Let's move to the next stage: **Evidence Gathering**. reply 3"
        );

        let stored = controller
            .store()
            .get_session(session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_message_count, 3);
        assert_eq!(stored.current_stage, Stage::Evidence);

        // Guidance uses the post-increment stage; history excludes the new message.
        let seen = generator.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (Stage::Comprehension, 1),
                (Stage::Comprehension, 3),
                (Stage::Evidence, 5)
            ]
        );
    }

    #[tokio::test]
    async fn test_generator_failure_stores_fallback() {
        let (controller, assignment) = setup(Arc::new(FailingGenerator)).await;
        let student = Uuid::new_v4();
        let session = controller
            .get_or_create_session(student, assignment.id)
            .await
            .unwrap()
            .session;

        let outcome = controller
            .submit_user_turn(student, session.id, "Hello?")
            .await
            .unwrap();
        assert_eq!(outcome.ai_message.text, FALLBACK_REPLY);
        assert!(outcome.ai_message.sources.is_none());

        let stored = controller
            .store()
            .get_session(session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_message_count, 1);
    }

    #[tokio::test]
    async fn test_generator_timeout_stores_fallback() {
        let (controller, assignment) = setup(Arc::new(SlowGenerator)).await;
        let controller = controller.with_ai_timeout(Duration::from_millis(50));
        let student = Uuid::new_v4();
        let session = controller
            .get_or_create_session(student, assignment.id)
            .await
            .unwrap()
            .session;

        let outcome = controller
            .submit_user_turn(student, session.id, "Anyone there?")
            .await
            .unwrap();
        assert_eq!(outcome.ai_message.text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_write() {
        let (controller, assignment) = setup(Arc::new(EchoGenerator::default())).await;
        let student = Uuid::new_v4();
        let session = controller
            .get_or_create_session(student, assignment.id)
            .await
            .unwrap()
            .session;

        let too_long = "x".repeat(5001);
        for text in ["", "   \n", too_long.as_str()] {
            let err = controller
                .submit_user_turn(student, session.id, text)
                .await
                .unwrap_err();
            assert!(matches!(err, TutorError::Validation { .. }));
        }
        let exactly_max = "y".repeat(5000);
        assert!(controller
            .submit_user_turn(student, session.id, &exactly_max)
            .await
            .is_ok());

        let messages = controller.store().messages(session.id).await.unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn test_other_students_session_is_denied() {
        let (controller, assignment) = setup(Arc::new(EchoGenerator::default())).await;
        let owner = Uuid::new_v4();
        let session = controller
            .get_or_create_session(owner, assignment.id)
            .await
            .unwrap()
            .session;

        let err = controller
            .submit_user_turn(Uuid::new_v4(), session.id, "Let me in")
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::AccessDenied));

        let err = controller
            .submit_user_turn(owner, Uuid::new_v4(), "Wrong id")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Chat session not found");
    }

    #[tokio::test]
    async fn test_locks_are_released_after_turns() {
        let (controller, assignment) = setup(Arc::new(EchoGenerator::default())).await;
        let student = Uuid::new_v4();
        let session = controller
            .get_or_create_session(student, assignment.id)
            .await
            .unwrap()
            .session;
        controller
            .submit_user_turn(student, session.id, "one")
            .await
            .unwrap();
        assert!(controller.locks.is_empty().await);
    }

    #[tokio::test]
    async fn test_dropped_request_still_records_reply() {
        let (controller, assignment) =
            setup(Arc::new(DelayedGenerator(Duration::from_millis(200)))).await;
        let student = Uuid::new_v4();
        let session = controller
            .get_or_create_session(student, assignment.id)
            .await
            .unwrap()
            .session;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            controller.submit_user_turn(student, session.id, "Still there?"),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let senders: Vec<Sender> = controller
            .store()
            .messages(session.id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.sender)
            .collect();
        assert_eq!(senders, vec![Sender::Ai, Sender::User, Sender::Ai]);
        assert!(controller.locks.is_empty().await);

        // The next turn sees a well-formed history.
        let next = controller
            .submit_user_turn(student, session.id, "Thanks")
            .await
            .unwrap();
        assert_eq!(next.user_message.ordinal, 3);
        assert_eq!(next.ai_message.ordinal, 4);
    }

    #[test]
    fn test_transition_announcement() {
        assert_eq!(
            transition_announcement(Stage::Advanced),
            "Great progress! Let's move to the next stage: **Advanced Synthesis**. "
        );
    }
}
