//! Persistence for assignments, sessions, transcripts and grades.
//!
//! [`TutorStore`] is the seam between the controller and storage. The
//! in-process [`MemoryStore`] keeps everything behind one async mutex, which
//! makes ordinal assignment and the session progress update a single critical
//! section, and optionally mirrors its state to a JSON snapshot on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, TutorError};
use crate::session::{Assignment, Grade, Message, NewMessage, Progress, Session};

/// Storage operations needed by the tutor.
#[async_trait]
pub trait TutorStore: Send + Sync {
    /// Looks up an assignment by id.
    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>>;

    /// Returns all assignments in insertion order.
    async fn list_assignments(&self) -> Result<Vec<Assignment>>;

    /// Stores an assignment. Returns `false` if one with the same id exists.
    async fn insert_assignment(&self, assignment: Assignment) -> Result<bool>;

    /// Replaces the stored assignment with the same id.
    async fn update_assignment(&self, assignment: Assignment) -> Result<()>;

    /// Removes an assignment that no session refers to.
    ///
    /// Fails with `TutorError::AssignmentInUse` while any session exists, so
    /// a transcript never loses its assignment.
    async fn delete_assignment(&self, id: Uuid) -> Result<()>;

    /// Returns the session for `(student, assignment)`, creating it with a
    /// greeting at ordinal 0 if absent. The flag is `true` when created.
    async fn get_or_create_session(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
        greeting: String,
    ) -> Result<(Session, bool)>;

    /// Looks up a session by id.
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Looks up the session of a student on an assignment.
    async fn find_session(&self, student_id: Uuid, assignment_id: Uuid)
        -> Result<Option<Session>>;

    /// All sessions on an assignment, oldest first.
    async fn list_sessions(&self, assignment_id: Uuid) -> Result<Vec<Session>>;

    /// Transcript of a session ordered by ordinal.
    async fn messages(&self, session_id: Uuid) -> Result<Vec<Message>>;

    /// Appends a message at the next ordinal. When `progress` is given the
    /// session counters are updated in the same write.
    async fn append_message(
        &self,
        session_id: Uuid,
        message: NewMessage,
        progress: Option<Progress>,
    ) -> Result<(Message, Session)>;

    /// Grade of a session, if any.
    async fn get_grade(&self, session_id: Uuid) -> Result<Option<Grade>>;

    /// Stores a grade, replacing any previous one.
    async fn set_grade(&self, grade: Grade) -> Result<()>;
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    session: Session,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    grade: Option<Grade>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreData {
    #[serde(default)]
    assignments: Vec<Assignment>,
    #[serde(default)]
    sessions: HashMap<Uuid, SessionRecord>,
}

impl StoreData {
    fn find(&self, student_id: Uuid, assignment_id: Uuid) -> Option<&Session> {
        self.sessions
            .values()
            .map(|record| &record.session)
            .find(|s| s.student_id == student_id && s.assignment_id == assignment_id)
    }

    fn session_count(&self, assignment_id: Uuid) -> usize {
        self.sessions
            .values()
            .filter(|record| record.session.assignment_id == assignment_id)
            .count()
    }
}

/// In-memory [`TutorStore`] with an optional JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty store that never touches the disk.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by a snapshot file.
    ///
    /// A missing file starts an empty store; the file is created on the first
    /// write.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::StoreCorrupted` if the file exists but cannot be
    /// parsed, or `TutorError::Io` if it cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str::<StoreData>(&contents)
                .map_err(|e| TutorError::store_corrupted(&path, e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        info!(
            path = %path.display(),
            assignments = data.assignments.len(),
            sessions = data.sessions.len(),
            "Opened state snapshot"
        );
        Ok(Self {
            data: Mutex::new(data),
            snapshot: Some(path),
        })
    }

    /// Path of the snapshot file, if any.
    #[must_use]
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Applies `change` to `data`.
    ///
    /// With a snapshot the change is made on a copy, written to disk, and
    /// only then swapped in, so a failed write leaves memory as it was. The
    /// caller holds the data lock, so snapshots land on disk in write order.
    async fn commit<T>(
        &self,
        data: &mut StoreData,
        change: impl FnOnce(&mut StoreData) -> Result<T> + Send,
    ) -> Result<T> {
        let Some(path) = &self.snapshot else {
            return change(data);
        };
        let mut next = data.clone();
        let out = change(&mut next)?;
        write_snapshot(path, &next).await?;
        *data = next;
        Ok(out)
    }
}

async fn write_snapshot(path: &Path, data: &StoreData) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(data)?;
    let temp = temp_path(path);
    tokio::fs::write(&temp, json).await?;
    tokio::fs::rename(&temp, path).await?;
    debug!(path = %path.display(), "State snapshot written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    PathBuf::from(temp)
}

fn next_ordinal(messages: &[Message]) -> u32 {
    u32::try_from(messages.len()).unwrap_or(u32::MAX)
}

#[async_trait]
impl TutorStore for MemoryStore {
    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>> {
        let data = self.data.lock().await;
        Ok(data.assignments.iter().find(|a| a.id == id).cloned())
    }

    async fn list_assignments(&self) -> Result<Vec<Assignment>> {
        Ok(self.data.lock().await.assignments.clone())
    }

    async fn insert_assignment(&self, assignment: Assignment) -> Result<bool> {
        let mut data = self.data.lock().await;
        if data.assignments.iter().any(|a| a.id == assignment.id) {
            return Ok(false);
        }
        self.commit(&mut data, |next| {
            next.assignments.push(assignment);
            Ok(true)
        })
        .await
    }

    async fn update_assignment(&self, assignment: Assignment) -> Result<()> {
        let mut data = self.data.lock().await;
        self.commit(&mut data, |next| {
            let slot = next
                .assignments
                .iter_mut()
                .find(|a| a.id == assignment.id)
                .ok_or_else(|| TutorError::not_found("Assignment", assignment.id))?;
            *slot = assignment;
            Ok(())
        })
        .await
    }

    async fn delete_assignment(&self, id: Uuid) -> Result<()> {
        let mut data = self.data.lock().await;
        if !data.assignments.iter().any(|a| a.id == id) {
            return Err(TutorError::not_found("Assignment", id));
        }
        let student_count = data.session_count(id);
        if student_count > 0 {
            return Err(TutorError::AssignmentInUse { student_count });
        }
        self.commit(&mut data, |next| {
            next.assignments.retain(|a| a.id != id);
            Ok(())
        })
        .await
    }

    async fn get_or_create_session(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
        greeting: String,
    ) -> Result<(Session, bool)> {
        let mut data = self.data.lock().await;
        if let Some(existing) = data.find(student_id, assignment_id) {
            return Ok((existing.clone(), false));
        }

        let session = Session::new(student_id, assignment_id);
        let greeting = Message {
            id: Uuid::new_v4(),
            session_id: session.id,
            sender: crate::session::Sender::Ai,
            text: greeting,
            sources: None,
            ordinal: 0,
            created_at: session.started_at,
        };
        let record = SessionRecord {
            session: session.clone(),
            messages: vec![greeting],
            grade: None,
        };
        self.commit(&mut data, |next| {
            next.sessions.insert(record.session.id, record);
            Ok(())
        })
        .await?;
        Ok((session, true))
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let data = self.data.lock().await;
        Ok(data.sessions.get(&id).map(|record| record.session.clone()))
    }

    async fn find_session(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
    ) -> Result<Option<Session>> {
        let data = self.data.lock().await;
        Ok(data.find(student_id, assignment_id).cloned())
    }

    async fn list_sessions(&self, assignment_id: Uuid) -> Result<Vec<Session>> {
        let data = self.data.lock().await;
        let mut sessions: Vec<Session> = data
            .sessions
            .values()
            .map(|record| &record.session)
            .filter(|s| s.assignment_id == assignment_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    async fn messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        let data = self.data.lock().await;
        data.sessions
            .get(&session_id)
            .map(|record| record.messages.clone())
            .ok_or_else(|| TutorError::not_found("Chat session", session_id))
    }

    async fn append_message(
        &self,
        session_id: Uuid,
        message: NewMessage,
        progress: Option<Progress>,
    ) -> Result<(Message, Session)> {
        let mut data = self.data.lock().await;
        self.commit(&mut data, |next| {
            let record = next
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| TutorError::not_found("Chat session", session_id))?;
            let session = &mut record.session;
            if let Some(progress) = progress {
                session.user_message_count = progress.user_message_count;
                session.current_stage = session.current_stage.max(progress.stage);
                session.last_activity_at = progress.at;
            }
            let session = session.clone();

            let stored = Message {
                id: Uuid::new_v4(),
                session_id,
                sender: message.sender,
                text: message.text,
                sources: message.sources,
                ordinal: next_ordinal(&record.messages),
                created_at: Utc::now(),
            };
            record.messages.push(stored.clone());
            Ok((stored, session))
        })
        .await
    }

    async fn get_grade(&self, session_id: Uuid) -> Result<Option<Grade>> {
        let data = self.data.lock().await;
        Ok(data
            .sessions
            .get(&session_id)
            .and_then(|record| record.grade.clone()))
    }

    async fn set_grade(&self, grade: Grade) -> Result<()> {
        let mut data = self.data.lock().await;
        self.commit(&mut data, |next| {
            let record = next
                .sessions
                .get_mut(&grade.session_id)
                .ok_or_else(|| TutorError::not_found("Chat session", grade.session_id))?;
            record.grade = Some(grade);
            Ok(())
        })
        .await
    }
}
