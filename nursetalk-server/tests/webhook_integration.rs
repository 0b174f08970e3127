//! HTTP integration tests for the NurseTalk webhook API.
//!
//! External collaborators (text generator, messaging provider) are wiremock
//! servers and the conversation log is an in-memory SQLite pool, so these
//! tests exercise the full axum dispatch path end to end.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use nursetalk_core::config::{
    DatabaseConfig, GenerationConfig, MessagingConfig, NurseTalkConfig, ServiceConfig,
};
use nursetalk_core::generation::InferenceTextGenerator;
use nursetalk_core::messaging::{TwilioConfig, TwilioMessageSender};
use nursetalk_core::session::InMemorySessionStore;
use nursetalk_server::http::{build_router, HttpState};
use nursetalk_server::subsystems::triage::TriageDeps;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn make_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite pool");
    nursetalk_core::db::init_schema(&pool).await.expect("schema");
    pool
}

fn test_config() -> NurseTalkConfig {
    NurseTalkConfig {
        service: ServiceConfig {
            log_level: "info".to_string(),
            public_base_url: "http://localhost:8770".to_string(),
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
        generation: GenerationConfig {
            base_url: "http://unused".to_string(),
            max_new_tokens: 150,
            timeout_seconds: 5,
        },
        messaging: MessagingConfig {
            base_url: "http://unused".to_string(),
            from_number: "+15550009999".to_string(),
            max_retries: 1,
            retry_delay_ms: 10,
        },
        session: Default::default(),
        speech: Default::default(),
        http: Default::default(),
    }
}

async fn make_state(
    generator: &MockServer,
    twilio: &MockServer,
) -> (Arc<HttpState>, SqlitePool) {
    let pool = make_pool().await;

    let deps = Arc::new(TriageDeps {
        sessions: Arc::new(InMemorySessionStore::default()),
        generator: Arc::new(
            InferenceTextGenerator::new(generator.uri(), 150, Duration::from_secs(5)).unwrap(),
        ),
        sender: Arc::new(
            TwilioMessageSender::with_base_url(
                TwilioConfig {
                    account_sid: "ACtest".to_string(),
                    auth_token: "token".to_string(),
                    from_number: "+15550009999".to_string(),
                    max_retries: 1,
                    retry_delay_ms: 10,
                },
                twilio.uri(),
            )
            .unwrap(),
        ),
        speech: None,
        http_client: reqwest::Client::new(),
    });

    let state = Arc::new(HttpState {
        pool: pool.clone(),
        config: test_config(),
        deps,
    });
    (state, pool)
}

async fn mount_twilio_ok(twilio: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/ACtest/Messages.json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "sid": "SM123",
            "status": "queued"
        })))
        .mount(twilio)
        .await;
}

fn webhook_request(body_pairs: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body_pairs.to_string()))
        .unwrap()
}

async fn response_json(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ===========================================================================
// TEST 1: GET /version — returns version and service name
// ===========================================================================
#[tokio::test]
async fn test_version_endpoint() {
    let generator = MockServer::start().await;
    let twilio = MockServer::start().await;
    let (state, _pool) = make_state(&generator, &twilio).await;
    let app = build_router(state);

    let req = Request::builder()
        .method("GET")
        .uri("/version")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = response_json(resp).await;
    assert!(json["version"].is_string());
    assert_eq!(json["service"], "nursetalk");
}

// ===========================================================================
// TEST 2: GET /health — healthy with an open pool
// ===========================================================================
#[tokio::test]
async fn test_health_endpoint() {
    let generator = MockServer::start().await;
    let twilio = MockServer::start().await;
    let (state, _pool) = make_state(&generator, &twilio).await;
    let app = build_router(state);

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = response_json(resp).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["sqlite"].is_string());
}

// ===========================================================================
// TEST 3: POST /webhook without From — 400 BAD_REQUEST
// ===========================================================================
#[tokio::test]
async fn test_webhook_missing_from_is_rejected() {
    let generator = MockServer::start().await;
    let twilio = MockServer::start().await;
    let (state, _pool) = make_state(&generator, &twilio).await;
    let app = build_router(state);

    let resp = app
        .oneshot(webhook_request("Body=hello"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let json = response_json(resp).await;
    assert_eq!(json["status"], "error");
}

// ===========================================================================
// TEST 4: full conversation — greeting, two symptoms, finalization
// ===========================================================================
#[tokio::test]
async fn test_full_conversation_flow() {
    let generator = MockServer::start().await;
    let twilio = MockServer::start().await;

    mount_twilio_ok(&twilio).await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "generated_text": "Diagnosis: suspected measles\n\
                               First Aid: Monitor temperature.\n\
                               Seek emergency care if fever exceeds 40C."
        })))
        .mount(&generator)
        .await;

    let (state, pool) = make_state(&generator, &twilio).await;
    let app = build_router(state);

    // Greeting short-circuits without touching the state machine
    let resp = app
        .clone()
        .oneshot(webhook_request("From=whatsapp%3A%2B15558675309&Body=hi"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = response_json(resp).await;
    assert_eq!(json["status"], "quick_response");

    // Two symptoms
    for symptom in ["Body=high+fever", "Body=rash+on+arms"] {
        let resp = app
            .clone()
            .oneshot(webhook_request(&format!(
                "From=whatsapp%3A%2B15558675309&{}",
                symptom
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = response_json(resp).await;
        assert_eq!(json["status"], "processing");
    }

    // Finishing word triggers generation and delivery
    let resp = app
        .clone()
        .oneshot(webhook_request("From=whatsapp%3A%2B15558675309&Body=no"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = response_json(resp).await;
    assert_eq!(json["status"], "sent");

    // One generator call with the combined complaint
    let generator_requests = generator.received_requests().await.unwrap();
    assert_eq!(generator_requests.len(), 1);
    let prompt_body = String::from_utf8_lossy(&generator_requests[0].body).to_string();
    assert!(
        prompt_body.contains("high fever. rash on arms"),
        "prompt must carry the combined symptoms: {}",
        prompt_body
    );

    // Greeting + 2 acks + 1 final message = 4 provider deliveries
    let twilio_requests = twilio.received_requests().await.unwrap();
    assert_eq!(twilio_requests.len(), 4);
    let final_body = String::from_utf8_lossy(&twilio_requests[3].body).to_string();
    assert!(final_body.contains("Diagnosis"), "final delivery: {}", final_body);

    // All four turns are in the log, newest first
    let turns =
        nursetalk_server::subsystems::history::recent_turns(&pool, "+15558675309", 10)
            .await
            .unwrap();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].status, "sent");
    assert!(turns[0].response_time.is_some());
    assert_eq!(turns[0].user_input, "no");
    assert_eq!(turns[3].status, "quick_response");
}

// ===========================================================================
// TEST 5: GET /conversations/{phone} — newest first with limit
// ===========================================================================
#[tokio::test]
async fn test_conversation_history_endpoint() {
    let generator = MockServer::start().await;
    let twilio = MockServer::start().await;
    let (state, pool) = make_state(&generator, &twilio).await;
    let app = build_router(state);

    for i in 0..3 {
        nursetalk_server::subsystems::history::append_turn(
            &pool,
            "+15558675309",
            &format!("symptom {}", i),
            "ack",
            None,
            nursetalk_core::models::TurnStatus::Processing,
        )
        .await
        .unwrap();
    }

    let req = Request::builder()
        .method("GET")
        .uri("/conversations/+15558675309?limit=2")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = response_json(resp).await;
    assert_eq!(json["count"], 2);
    assert_eq!(json["turns"][0]["user_input"], "symptom 2");
    assert_eq!(json["turns"][1]["user_input"], "symptom 1");
}

// ===========================================================================
// TEST 6: generation failure — apology delivered, turn logged as failed
// ===========================================================================
#[tokio::test]
async fn test_generation_failure_sends_apology() {
    let generator = MockServer::start().await;
    let twilio = MockServer::start().await;

    mount_twilio_ok(&twilio).await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": "model overloaded"
        })))
        .mount(&generator)
        .await;

    let (state, pool) = make_state(&generator, &twilio).await;
    let app = build_router(state);

    for body in ["Body=fever", "Body=done"] {
        let resp = app
            .clone()
            .oneshot(webhook_request(&format!(
                "From=whatsapp%3A%2B15551230000&{}",
                body
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let turns =
        nursetalk_server::subsystems::history::recent_turns(&pool, "+15551230000", 10)
            .await
            .unwrap();
    assert_eq!(turns[0].status, "failed");
    assert!(turns[0].bot_response.contains("I apologize"));

    // The apology itself still went through the provider
    let twilio_requests = twilio.received_requests().await.unwrap();
    assert_eq!(twilio_requests.len(), 2);
}
