//! Triage orchestration tests with fake collaborators.
//!
//! These cover the state-machine edge cases that need control over the
//! session store and call counting on the generator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use nursetalk_core::dialogue::{ACK_PROMPT, NO_SYMPTOMS_PROMPT};
use nursetalk_core::generation::{Generation, GenerationError, TextGenerator};
use nursetalk_core::messaging::{DeliveryError, DeliveryReceipt, MessageSender};
use nursetalk_core::models::ConversationTurn;
use nursetalk_core::session::{
    ConversationSession, InMemorySessionStore, SessionState, SessionStore,
};
use nursetalk_server::subsystems::triage::{handle_incoming, InboundMessage, TriageDeps};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

struct CountingGenerator {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl TextGenerator for CountingGenerator {
    async fn generate(
        &self,
        _combined_symptoms: &str,
        _recent_turns: &[ConversationTurn],
    ) -> Result<Generation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GenerationError::Api {
                code: 500,
                message: "model overloaded".to_string(),
            });
        }
        Ok(Generation {
            raw_text: "Diagnosis: viral fever\nFirst Aid: Monitor temperature.".to_string(),
            elapsed_seconds: 1.5,
        })
    }

    fn name(&self) -> &str {
        "counting-fake"
    }
}

#[derive(Default)]
struct RecordingSender {
    deliveries: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn deliver(&self, to: &str, body: &str) -> Result<DeliveryReceipt, DeliveryError> {
        self.deliveries
            .lock()
            .await
            .push((to.to_string(), body.to_string()));
        Ok(DeliveryReceipt {
            message_sid: Some("SMfake".to_string()),
            segments: 1,
        })
    }

    async fn deliver_media(&self, _to: &str, _media_url: &str) -> Result<(), DeliveryError> {
        Ok(())
    }
}

async fn make_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite pool");
    nursetalk_core::db::init_schema(&pool).await.expect("schema");
    pool
}

fn make_deps(
    sessions: Arc<InMemorySessionStore>,
    generator: Arc<CountingGenerator>,
    sender: Arc<RecordingSender>,
) -> TriageDeps {
    TriageDeps {
        sessions,
        generator,
        sender,
        speech: None,
        http_client: reqwest::Client::new(),
    }
}

fn text_message(body: &str) -> InboundMessage {
    InboundMessage {
        from: "whatsapp:+15558675309".to_string(),
        body: Some(body.to_string()),
        media_url: None,
        media_content_type: None,
    }
}

#[tokio::test]
async fn test_finishing_word_with_empty_history_skips_generator() {
    let pool = make_pool().await;
    let sessions = Arc::new(InMemorySessionStore::default());
    let generator = Arc::new(CountingGenerator {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let sender = Arc::new(RecordingSender::default());

    // Force the edge case: collecting state with nothing collected
    let mut session = ConversationSession::new("+15558675309");
    session.state = SessionState::CollectingSymptoms;
    sessions.put(session).await;

    let deps = make_deps(sessions.clone(), generator.clone(), sender.clone());
    let report = handle_incoming(&pool, &deps, text_message("no")).await;

    assert_eq!(report.reply, NO_SYMPTOMS_PROMPT);
    assert_eq!(
        generator.calls.load(Ordering::SeqCst),
        0,
        "generator must not run with an empty symptom history"
    );

    // Session was reset to a fresh greeting state
    let session = sessions.get("+15558675309").await.expect("session");
    assert_eq!(session.state, SessionState::Greeting);
    assert!(session.symptom_history.is_empty());
}

#[tokio::test]
async fn test_generation_failure_resets_session() {
    let pool = make_pool().await;
    let sessions = Arc::new(InMemorySessionStore::default());
    let generator = Arc::new(CountingGenerator {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let sender = Arc::new(RecordingSender::default());
    let deps = make_deps(sessions.clone(), generator.clone(), sender.clone());

    handle_incoming(&pool, &deps, text_message("fever")).await;
    let report = handle_incoming(&pool, &deps, text_message("done")).await;

    assert_eq!(report.status.as_str(), "failed");
    assert!(report.reply.contains("I apologize"));

    // Next message starts a brand-new collection
    let report = handle_incoming(&pool, &deps, text_message("headache")).await;
    assert_eq!(report.reply, ACK_PROMPT);
    let session = sessions.get("+15558675309").await.expect("session");
    assert_eq!(session.symptom_history, vec!["headache".to_string()]);
}

#[tokio::test]
async fn test_idle_session_behaves_like_new() {
    let pool = make_pool().await;
    let sessions = Arc::new(InMemorySessionStore::default());
    let generator = Arc::new(CountingGenerator {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let sender = Arc::new(RecordingSender::default());

    // A stale mid-collection session, idle for 31 minutes
    let mut session = ConversationSession::new("+15558675309");
    session.state = SessionState::CollectingSymptoms;
    session.symptom_history.push("fever".to_string());
    session.last_update = Utc::now() - chrono::Duration::minutes(31);
    sessions.put(session).await;

    let deps = make_deps(sessions.clone(), generator.clone(), sender.clone());

    // "no" would finalize a live session; on an expired one it is just the
    // first symptom of a new conversation
    let report = handle_incoming(&pool, &deps, text_message("no")).await;
    assert_eq!(report.reply, ACK_PROMPT);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

    let session = sessions.get("+15558675309").await.expect("session");
    assert_eq!(session.state, SessionState::CollectingSymptoms);
    assert_eq!(session.symptom_history, vec!["no".to_string()]);
}

#[tokio::test]
async fn test_successful_turn_delivers_formatted_reply() {
    let pool = make_pool().await;
    let sessions = Arc::new(InMemorySessionStore::default());
    let generator = Arc::new(CountingGenerator {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let sender = Arc::new(RecordingSender::default());
    let deps = make_deps(sessions.clone(), generator.clone(), sender.clone());

    handle_incoming(&pool, &deps, text_message("fever")).await;
    let report = handle_incoming(&pool, &deps, text_message("that's all")).await;

    assert_eq!(report.status.as_str(), "sent");
    assert_eq!(report.response_time, Some(1.5));
    assert!(report.reply.starts_with("Diagnosis:\nviral fever"));
    assert!(report.reply.contains("- Monitor temperature."));

    let deliveries = sender.deliveries.lock().await;
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[1].0, "+15558675309");
    assert_eq!(deliveries[1].1, report.reply);
}

#[tokio::test]
async fn test_empty_body_prompts_without_creating_session() {
    let pool = make_pool().await;
    let sessions = Arc::new(InMemorySessionStore::default());
    let generator = Arc::new(CountingGenerator {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let sender = Arc::new(RecordingSender::default());
    let deps = make_deps(sessions.clone(), generator.clone(), sender.clone());

    let report = handle_incoming(&pool, &deps, text_message("   ")).await;

    assert!(report.reply.contains("didn't receive any message"));
    assert!(
        sessions.get("+15558675309").await.is_none(),
        "rejected input must not create session state"
    );
}
