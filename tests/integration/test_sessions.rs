//! End-to-end tests for tutoring sessions.
//!
//! These drive the session controller and reviewer against the in-memory
//! store with scripted turn generators, starting from the fixture catalog.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eco_report::{json::JsonGenerator, Speaker};
use eco_tutor::{
    next_stage, transcript_report, Catalog, Config, GradeInput, LlmErrorKind, MemoryStore,
    Reviewer, Sender, SessionController, Source, Stage, TurnGenerator, TurnReply, TurnRequest,
    TutorError, TutorStore, FALLBACK_REPLY,
};
use uuid::Uuid;

const FRAGMENTATION: &str = "5d8f2c1a-6b3e-4f7a-9c0d-1e2f3a4b5c6d";
const PROFESSOR: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";

/// Path to the fixture directory.
fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Replays a fixed list of replies, then repeats the last one.
struct ScriptedGenerator {
    replies: Vec<&'static str>,
    calls: AtomicUsize,
    stages: Mutex<Vec<Stage>>,
}

impl ScriptedGenerator {
    fn new(replies: Vec<&'static str>) -> Self {
        Self {
            replies,
            calls: AtomicUsize::new(0),
            stages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TurnGenerator for ScriptedGenerator {
    async fn generate(&self, request: TurnRequest<'_>) -> eco_tutor::Result<TurnReply> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.stages.lock().unwrap().push(request.stage);
        let text = self.replies[n.min(self.replies.len() - 1)];
        Ok(TurnReply {
            text: text.to_string(),
            sources: vec![Source {
                uri: "https://doi.org/10.1146/annurev.ecolsys.34.011802.132419".to_string(),
                title: "Annual Review of Ecology".to_string(),
            }],
        })
    }
}

struct DownGenerator;

#[async_trait]
impl TurnGenerator for DownGenerator {
    async fn generate(&self, _request: TurnRequest<'_>) -> eco_tutor::Result<TurnReply> {
        Err(TutorError::llm_api_error(
            LlmErrorKind::RateLimit,
            "HTTP 429: quota exceeded",
        ))
    }
}

/// Replies after a short delay so concurrent turns overlap.
struct SlowEcho;

#[async_trait]
impl TurnGenerator for SlowEcho {
    async fn generate(&self, request: TurnRequest<'_>) -> eco_tutor::Result<TurnReply> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(TurnReply::text(format!("echo: {}", request.user_text)))
    }
}

/// A store seeded from the fixture catalog.
async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let added = Catalog::load(&fixture_path().join("catalog.json"))
        .expect("Failed to load catalog")
        .seed(&*store)
        .await
        .expect("Failed to seed catalog");
    assert_eq!(added, 2);
    store
}

fn controller(store: &Arc<MemoryStore>, generator: Arc<dyn TurnGenerator>) -> SessionController {
    SessionController::new(store.clone(), generator, &Config::default())
}

fn fragmentation() -> Uuid {
    FRAGMENTATION.parse().unwrap()
}

#[test]
fn test_fixture_config_loads() {
    let config =
        Config::load_from_file(&fixture_path().join("eco.json")).expect("Failed to load config");
    assert_eq!(config.max_message_chars, 2000);
    assert_eq!(config.ai_timeout_secs, 30);
    assert!(!config.gemini.web_search);
    assert_eq!(config.gemini.api_key_env, "GEMINI_API_KEY");
    config.validate().expect("Fixture config should be valid");
}

/// Three turns move a fresh session from Comprehension to Evidence, and the
/// reply on the third turn announces the new stage.
#[tokio::test]
async fn test_three_turns_advance_to_evidence() {
    let store = seeded_store().await;
    let generator = Arc::new(ScriptedGenerator::new(vec![
        "Fragmentation is the breaking apart of habitat.",
        "Good question. What does Fahrig say about scale?",
        "Exactly. Which findings support that claim?",
    ]));
    let controller = controller(&store, generator.clone());
    let student = Uuid::new_v4();

    let view = controller
        .get_or_create_session(student, fragmentation())
        .await
        .unwrap();
    let session_id = view.session.id;

    let first = controller
        .submit_user_turn(student, session_id, "What is fragmentation?")
        .await
        .unwrap();
    assert_eq!(first.new_stage, Stage::Comprehension);
    let after_one = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(after_one.user_message_count, 1);

    controller
        .submit_user_turn(student, session_id, "Is it the same as habitat loss?")
        .await
        .unwrap();
    let third = controller
        .submit_user_turn(student, session_id, "So the scale of measurement matters?")
        .await
        .unwrap();

    assert_eq!(third.new_stage, Stage::Evidence);
    assert!(third
        .ai_message
        .text
        .starts_with("Great progress! Let's move to the next stage: **Evidence Gathering**. "));
    assert!(third.ai_message.text.ends_with("Which findings support that claim?"));

    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.user_message_count, 3);
    assert_eq!(session.current_stage, Stage::Evidence);

    // The generator sees the stage the turn is answered in.
    let stages = generator.stages.lock().unwrap().clone();
    assert_eq!(
        stages,
        vec![Stage::Comprehension, Stage::Comprehension, Stage::Evidence]
    );
}

/// Stage only moves forward, one step per three turns, and stops at Advanced.
#[tokio::test]
async fn test_stage_progression_over_many_turns() {
    let store = seeded_store().await;
    let controller = controller(&store, Arc::new(ScriptedGenerator::new(vec!["ok"])));
    let student = Uuid::new_v4();
    let session_id = controller
        .get_or_create_session(student, fragmentation())
        .await
        .unwrap()
        .session
        .id;

    let mut previous = Stage::Comprehension;
    let mut expected = Stage::Comprehension;
    for turn in 1..=12u32 {
        let outcome = controller
            .submit_user_turn(student, session_id, &format!("turn {turn}"))
            .await
            .unwrap();
        expected = next_stage(expected, turn);
        assert_eq!(outcome.new_stage, expected, "turn {turn}");
        assert!(outcome.new_stage >= previous);
        let advanced = outcome.new_stage != previous;
        assert_eq!(advanced, matches!(turn, 3 | 6 | 9), "turn {turn}");
        previous = outcome.new_stage;
    }
    assert_eq!(previous, Stage::Advanced);
}

/// A failing generator still yields a stored apology and updated progress.
#[tokio::test]
async fn test_generator_failure_falls_back() {
    let store = seeded_store().await;
    let controller = controller(&store, Arc::new(DownGenerator));
    let student = Uuid::new_v4();
    let session_id = controller
        .get_or_create_session(student, fragmentation())
        .await
        .unwrap()
        .session
        .id;

    let outcome = controller
        .submit_user_turn(student, session_id, "What is fragmentation?")
        .await
        .unwrap();
    assert_eq!(outcome.user_message.text, "What is fragmentation?");
    assert_eq!(outcome.ai_message.text, FALLBACK_REPLY);
    assert!(outcome.ai_message.sources.is_none());

    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.user_message_count, 1);
    assert_eq!(store.messages(session_id).await.unwrap().len(), 3);
}

/// Two students on one assignment get separate sessions and counters.
#[tokio::test]
async fn test_students_are_independent() {
    let store = seeded_store().await;
    let controller = controller(&store, Arc::new(ScriptedGenerator::new(vec!["ok"])));
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let alice_session = controller
        .get_or_create_session(alice, fragmentation())
        .await
        .unwrap()
        .session
        .id;
    let bob_session = controller
        .get_or_create_session(bob, fragmentation())
        .await
        .unwrap()
        .session
        .id;
    assert_ne!(alice_session, bob_session);

    for text in ["one", "two", "three"] {
        controller
            .submit_user_turn(alice, alice_session, text)
            .await
            .unwrap();
    }
    controller
        .submit_user_turn(bob, bob_session, "one")
        .await
        .unwrap();

    let alice_state = store.get_session(alice_session).await.unwrap().unwrap();
    let bob_state = store.get_session(bob_session).await.unwrap().unwrap();
    assert_eq!(alice_state.current_stage, Stage::Evidence);
    assert_eq!(bob_state.current_stage, Stage::Comprehension);
    assert_eq!(bob_state.user_message_count, 1);

    let err = controller
        .submit_user_turn(bob, alice_session, "let me in")
        .await
        .unwrap_err();
    assert!(matches!(err, TutorError::AccessDenied));
}

/// Reopening a chat returns the same session with a single greeting.
#[tokio::test]
async fn test_get_or_create_is_idempotent() {
    let store = seeded_store().await;
    let controller = controller(&store, Arc::new(ScriptedGenerator::new(vec!["ok"])));
    let student = Uuid::new_v4();

    let first = controller
        .get_or_create_session(student, fragmentation())
        .await
        .unwrap();
    let second = controller
        .get_or_create_session(student, fragmentation())
        .await
        .unwrap();

    assert_eq!(first.session.id, second.session.id);
    assert_eq!(second.messages.len(), 1);
    assert_eq!(second.messages[0].sender, Sender::Ai);
    assert!(second.messages[0]
        .text
        .contains("\"Effects of Habitat Fragmentation on Biodiversity\""));
}

/// Concurrent turns on one session keep ordinals gapless and pair each
/// student message with its reply.
#[tokio::test]
async fn test_concurrent_turns_keep_ordinals_gapless() {
    let store = seeded_store().await;
    let controller = Arc::new(controller(&store, Arc::new(SlowEcho)));
    let student = Uuid::new_v4();
    let session_id = controller
        .get_or_create_session(student, fragmentation())
        .await
        .unwrap()
        .session
        .id;

    let turns = (0..8).map(|i| {
        let controller = Arc::clone(&controller);
        async move {
            controller
                .submit_user_turn(student, session_id, &format!("question {i}"))
                .await
        }
    });
    let outcomes = futures::future::join_all(turns).await;
    assert!(outcomes.iter().all(Result::is_ok));

    let messages = store.messages(session_id).await.unwrap();
    assert_eq!(messages.len(), 17);
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.ordinal as usize, i);
    }
    for pair in messages[1..].chunks(2) {
        assert_eq!(pair[0].sender, Sender::User);
        assert_eq!(pair[1].sender, Sender::Ai);
        // Transition turns prefix the echo with an announcement.
        assert!(pair[1].text.ends_with(&format!("echo: {}", pair[0].text)));
    }

    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.user_message_count, 8);
    assert_eq!(session.current_stage, Stage::Analysis);
}

/// Grading and exporting a finished session produces a complete transcript.
#[tokio::test]
async fn test_graded_session_transcript() {
    let store = seeded_store().await;
    let controller = controller(
        &store,
        Arc::new(ScriptedGenerator::new(vec!["Consider the landscape scale."])),
    );
    let reviewer = Reviewer::new(store.clone());
    let student = Uuid::new_v4();
    let session_id = controller
        .get_or_create_session(student, fragmentation())
        .await
        .unwrap()
        .session
        .id;
    controller
        .submit_user_turn(student, session_id, "Why does scale matter?")
        .await
        .unwrap();

    let professor: Uuid = PROFESSOR.parse().unwrap();
    reviewer
        .grade_session(
            professor,
            session_id,
            GradeInput {
                overall_score: Some(27.0),
                feedback: Some("Clear distinction between loss and fragmentation.".to_string()),
                rubric_scores: None,
            },
        )
        .await
        .unwrap();

    let view = reviewer.review_session(professor, session_id).await.unwrap();
    let report = transcript_report(&view);
    assert_eq!(report.turns_by(Speaker::Student), 1);
    assert_eq!(report.turns_by(Speaker::Tutor), 2);
    assert_eq!(report.citation_count(), 1);
    assert_eq!(report.grade.as_ref().and_then(|g| g.overall_score), Some(27.0));

    let json = JsonGenerator::new(&report).generate().unwrap();
    assert!(json.contains("Why does scale matter?"));

    let export = reviewer.transcript(professor, session_id).await.unwrap();
    assert!(export
        .file_name
        .starts_with("transcript-week-3-habitat-fragmentation-"));
    assert!(export.markdown.contains("**Overall score**: 27"));
    assert!(export.markdown.contains("- [Annual Review of Ecology]"));
}
