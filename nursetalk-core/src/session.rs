//! Per-phone-number conversation sessions.
//!
//! Sessions are held behind the `SessionStore` trait so handlers receive an
//! injected store rather than reaching for process globals. The in-memory
//! implementation serializes all mutations through one async mutex, which
//! keeps concurrent webhook requests from losing updates.
//!
//! Expiry is lazy: a session that has been idle past the configured timeout
//! is dropped on the next `get`, so it behaves exactly like a brand-new one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Default idle timeout before a session is discarded.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Greeting,
    CollectingSymptoms,
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub phone_number: String,
    pub state: SessionState,
    pub symptom_history: Vec<String>,
    pub last_update: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            state: SessionState::Greeting,
            symptom_history: Vec::new(),
            last_update: Utc::now(),
        }
    }

    /// Record a symptom. Only meaningful while collecting; the state machine
    /// moves the session into `CollectingSymptoms` before the first append.
    pub fn append_symptom(&mut self, symptom: impl Into<String>) {
        self.symptom_history.push(symptom.into());
        self.last_update = Utc::now();
    }

    /// Back to the initial state with an empty history. Used after a
    /// finalized diagnosis, a generation failure, and the empty-history
    /// "finished" edge case.
    pub fn reset(&mut self) {
        self.state = SessionState::Greeting;
        self.symptom_history.clear();
        self.last_update = Utc::now();
    }

    pub fn is_expired(&self, idle_timeout: Duration, now: DateTime<Utc>) -> bool {
        let idle = now.signed_duration_since(self.last_update);
        idle.num_seconds() >= 0 && idle.num_seconds() as u64 >= idle_timeout.as_secs()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a live session. Expired sessions are dropped and reported as
    /// absent.
    async fn get(&self, phone_number: &str) -> Option<ConversationSession>;

    async fn put(&self, session: ConversationSession);

    async fn delete(&self, phone_number: &str);
}

/// Process-local session store backed by a mutex-guarded map.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, ConversationSession>>,
    idle_timeout: Duration,
}

impl InMemorySessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, phone_number: &str) -> Option<ConversationSession> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(phone_number) {
            Some(session) if session.is_expired(self.idle_timeout, Utc::now()) => {
                tracing::debug!(phone = %phone_number, "Session expired, dropping");
                sessions.remove(phone_number);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }

    async fn put(&self, session: ConversationSession) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.phone_number.clone(), session);
    }

    async fn delete(&self, phone_number: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(phone_number);
    }
}
