//! Per-user conversation sessions.
//!
//! Each handle maps to its own `Arc<tokio::sync::Mutex<Session>>`. A caller
//! holds the owned guard for a whole transition, so two messages from the
//! same user are applied one after the other while different users never
//! wait on each other. The outer map lock is only held to look up or insert
//! an entry, never across an await.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use taskping_proto::ingest::TaskRecord;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Step of the authoring dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    /// Idle; the next message is interpreted as a command.
    #[default]
    AwaitingCommands,
    /// Waiting for the task sheet upload.
    AwaitingFile,
    /// Sheet accepted, waiting for the event keyname.
    AwaitingEventName,
    /// Keyname accepted, waiting for the default lead time.
    AwaitingRemindTime,
    /// Waiting for the keyname of the event to delete.
    AwaitingDeletion,
}

/// Transient authoring state of one user.
#[derive(Debug)]
pub struct Session {
    /// Current dialog step.
    pub step: Step,
    /// Records from the accepted sheet, in sheet order.
    pub parsed_tasks: Vec<TaskRecord>,
    /// Accepted keyname.
    pub event_name: Option<String>,
    last_activity: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            step: Step::AwaitingCommands,
            parsed_tasks: Vec::new(),
            event_name: None,
            last_activity: Instant::now(),
        }
    }
}

impl Session {
    /// Returns to idle and drops every partial field.
    pub fn reset(&mut self) {
        self.step = Step::AwaitingCommands;
        self.parsed_tasks.clear();
        self.event_name = None;
    }

    fn expired(&self, idle: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > idle
    }
}

type SessionSlot = Arc<tokio::sync::Mutex<Session>>;

/// Keyed store of sessions with idle expiry.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionSlot>>,
    idle: Duration,
}

impl SessionStore {
    /// Creates an empty store whose sessions expire after `idle`.
    #[must_use]
    pub fn new(idle: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle,
        }
    }

    /// Locks the session of `handle`, creating it if needed.
    ///
    /// A session that sat idle for longer than the expiry is reset before it
    /// is handed out. The activity timestamp is refreshed on every call.
    pub async fn lock(&self, handle: &str) -> OwnedMutexGuard<Session> {
        let slot = {
            let mut sessions = self.sessions.lock();
            Arc::clone(sessions.entry(handle.to_string()).or_default())
        };
        let mut session = slot.lock_owned().await;
        let now = Instant::now();
        if session.step != Step::AwaitingCommands && session.expired(self.idle, now) {
            debug!(handle, step = ?session.step, "conversation session expired");
            session.reset();
        }
        session.last_activity = now;
        session
    }

    /// Current step of `handle` without creating a session.
    pub async fn step(&self, handle: &str) -> Step {
        let slot = self.sessions.lock().get(handle).cloned();
        match slot {
            Some(slot) => slot.lock().await.step,
            None => Step::AwaitingCommands,
        }
    }

    /// Drops idle and expired sessions that nobody is currently using.
    /// Returns the number of sessions removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, slot| match slot.try_lock() {
            Ok(session) => {
                session.step != Step::AwaitingCommands && !session.expired(self.idle, now)
            }
            Err(_) => true,
        });
        before - sessions.len()
    }

    /// Number of sessions currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no sessions are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
