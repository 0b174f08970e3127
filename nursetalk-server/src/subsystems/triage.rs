//! Per-turn triage orchestration.
//!
//! One inbound webhook call flows through here exactly once:
//! normalize → session lookup → state machine → (generator → formatter) →
//! delivery → conversation log. All failures are contained per-request; the
//! user gets a canned apology and the provider still gets its
//! acknowledgment.

use std::sync::Arc;
use std::time::Duration;

use nursetalk_core::dialogue::{self, TurnDecision, APOLOGY_REPLY, EMPTY_MESSAGE_PROMPT};
use nursetalk_core::formatter::format_response;
use nursetalk_core::generation::TextGenerator;
use nursetalk_core::messaging::MessageSender;
use nursetalk_core::models::TurnStatus;
use nursetalk_core::phone::canonical_phone;
use nursetalk_core::session::{ConversationSession, SessionStore};
use nursetalk_core::speech::{SpeechSynthesizer, SpeechTranscriber};
use sqlx::SqlitePool;

use crate::subsystems::history;
use crate::subsystems::media::{self, MediaStore};

const AUDIO_UNREADABLE_PROMPT: &str = "I couldn't make out that voice note. \
Could you type your symptoms instead?";

/// Marker logged as the user input when a voice note had no usable
/// transcription.
const VOICE_NOTE_MARKER: &str = "[voice note]";

/// How many persisted turns are offered to the generator as context.
const CONTEXT_TURNS: i64 = 5;

/// Speech support bundle; absent when `[speech] enabled = false`.
pub struct SpeechServices {
    pub transcriber: Arc<dyn SpeechTranscriber>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub media: MediaStore,
    pub max_audio_age: Duration,
}

/// Everything a turn needs, constructed once at startup and injected.
pub struct TriageDeps {
    pub sessions: Arc<dyn SessionStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub sender: Arc<dyn MessageSender>,
    pub speech: Option<SpeechServices>,
    pub http_client: reqwest::Client,
}

/// Parsed webhook payload.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub media_content_type: Option<String>,
}

/// What happened with this turn, for the webhook response and tests.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub phone: String,
    pub reply: String,
    pub status: TurnStatus,
    pub response_time: Option<f64>,
}

/// Run one full conversational turn.
pub async fn handle_incoming(
    pool: &SqlitePool,
    deps: &TriageDeps,
    inbound: InboundMessage,
) -> TurnReport {
    let phone = canonical_phone(&inbound.from);

    let (text, logged_input) = resolve_input(deps, &inbound).await;

    let text = match text {
        Some(t) => t,
        None => {
            // Rejected input: prompt the user, touch no session state
            let prompt = if inbound.media_url.is_some() {
                AUDIO_UNREADABLE_PROMPT
            } else {
                EMPTY_MESSAGE_PROMPT
            };
            return send_and_log(
                pool,
                deps,
                &phone,
                &logged_input,
                prompt,
                None,
                TurnStatus::Processing,
            )
            .await;
        }
    };

    // Canned replies bypass the session entirely
    if let Some(reply) = dialogue::quick_reply(&text) {
        return send_and_log(
            pool,
            deps,
            &phone,
            &text,
            reply,
            None,
            TurnStatus::QuickResponse,
        )
        .await;
    }

    let mut session = deps
        .sessions
        .get(&phone)
        .await
        .unwrap_or_else(|| ConversationSession::new(phone.clone()));

    let decision = dialogue::advance(&mut session, &text);
    deps.sessions.put(session).await;

    match decision {
        TurnDecision::Acknowledge => {
            send_and_log(
                pool,
                deps,
                &phone,
                &text,
                dialogue::ACK_PROMPT,
                None,
                TurnStatus::Processing,
            )
            .await
        }
        TurnDecision::AskForFirstSymptom => {
            send_and_log(
                pool,
                deps,
                &phone,
                &text,
                dialogue::NO_SYMPTOMS_PROMPT,
                None,
                TurnStatus::Processing,
            )
            .await
        }
        TurnDecision::PromptForInput => {
            send_and_log(
                pool,
                deps,
                &phone,
                &text,
                EMPTY_MESSAGE_PROMPT,
                None,
                TurnStatus::Processing,
            )
            .await
        }
        TurnDecision::Finalize { combined_symptoms } => {
            finalize(pool, deps, &phone, &text, &combined_symptoms).await
        }
    }
}

/// Resolve the inbound payload to message text. Returns `(text, logged
/// input)`; `text == None` means the input was rejected.
async fn resolve_input(deps: &TriageDeps, inbound: &InboundMessage) -> (Option<String>, String) {
    if let Some(body) = inbound.body.as_deref() {
        let trimmed = body.trim();
        if !trimmed.is_empty() {
            return (Some(trimmed.to_string()), trimmed.to_string());
        }
    }

    let Some(media_url) = inbound.media_url.as_deref() else {
        return (None, String::new());
    };

    let Some(speech) = deps.speech.as_ref() else {
        tracing::warn!("Voice note received but speech support is disabled");
        return (None, VOICE_NOTE_MARKER.to_string());
    };

    let (audio, content_type) = match media::download_audio(&deps.http_client, media_url).await {
        Ok(downloaded) => downloaded,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to download inbound voice note");
            return (None, VOICE_NOTE_MARKER.to_string());
        }
    };
    let content_type = inbound
        .media_content_type
        .clone()
        .unwrap_or(content_type);

    match speech.transcriber.transcribe(&audio, &content_type).await {
        Ok(Some(text)) => {
            tracing::info!(chars = text.len(), "Transcribed inbound voice note");
            (Some(text.clone()), text)
        }
        Ok(None) | Err(_) => (None, VOICE_NOTE_MARKER.to_string()),
    }
}

/// Full diagnosis path: generator → formatter → delivery (+ optional audio).
async fn finalize(
    pool: &SqlitePool,
    deps: &TriageDeps,
    phone: &str,
    user_input: &str,
    combined_symptoms: &str,
) -> TurnReport {
    let recent = match history::recent_turns(pool, phone, CONTEXT_TURNS).await {
        Ok(turns) => turns,
        Err(e) => {
            tracing::warn!(error = %e, "Could not load recent turns for context");
            Vec::new()
        }
    };

    let generation = match deps.generator.generate(combined_symptoms, &recent).await {
        Ok(g) => g,
        Err(e) => {
            tracing::error!(phone = %phone, error = %e, "Generation failed");
            return send_and_log(
                pool,
                deps,
                phone,
                user_input,
                APOLOGY_REPLY,
                None,
                TurnStatus::Failed,
            )
            .await;
        }
    };

    let formatted = format_response(&generation.raw_text);

    match deps.sender.deliver(phone, &formatted).await {
        Ok(receipt) => {
            tracing::info!(
                phone = %phone,
                segments = receipt.segments,
                elapsed_seconds = generation.elapsed_seconds,
                "Delivered diagnosis"
            );
            attach_audio(deps, phone, &formatted).await;
            log_turn(
                pool,
                phone,
                user_input,
                &formatted,
                Some(generation.elapsed_seconds),
                TurnStatus::Sent,
            )
            .await;
            TurnReport {
                phone: phone.to_string(),
                reply: formatted,
                status: TurnStatus::Sent,
                response_time: Some(generation.elapsed_seconds),
            }
        }
        Err(e) => {
            tracing::error!(phone = %phone, error = %e, "Delivery failed");
            log_turn(
                pool,
                phone,
                user_input,
                &formatted,
                Some(generation.elapsed_seconds),
                TurnStatus::Failed,
            )
            .await;
            TurnReport {
                phone: phone.to_string(),
                reply: formatted,
                status: TurnStatus::Failed,
                response_time: Some(generation.elapsed_seconds),
            }
        }
    }
}

/// Synthesize and attach a voice version of the reply. Failures here never
/// affect the already-sent text.
async fn attach_audio(deps: &TriageDeps, phone: &str, formatted: &str) {
    let Some(speech) = deps.speech.as_ref() else {
        return;
    };

    let audio = match speech.synthesizer.synthesize(formatted).await {
        Ok(Some(audio)) => audio,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(error = %e, "Speech synthesis failed");
            return;
        }
    };

    let filename = match speech.media.store(phone, &audio).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(error = %e, "Could not store synthesized audio");
            return;
        }
    };

    let url = speech.media.public_url(&filename);
    if let Err(e) = deps.sender.deliver_media(phone, &url).await {
        tracing::warn!(error = %e, "Audio attachment delivery failed — text already sent");
    }

    if let Err(e) = speech.media.sweep_stale(speech.max_audio_age).await {
        tracing::warn!(error = %e, "Stale audio sweep failed");
    }
}

async fn send_and_log(
    pool: &SqlitePool,
    deps: &TriageDeps,
    phone: &str,
    user_input: &str,
    reply: &str,
    response_time: Option<f64>,
    status: TurnStatus,
) -> TurnReport {
    let status = match deps.sender.deliver(phone, reply).await {
        Ok(_) => status,
        Err(e) => {
            tracing::error!(phone = %phone, error = %e, "Reply delivery failed");
            TurnStatus::Failed
        }
    };

    log_turn(pool, phone, user_input, reply, response_time, status).await;

    TurnReport {
        phone: phone.to_string(),
        reply: reply.to_string(),
        status,
        response_time,
    }
}

/// Append to the conversation log; a logging failure is contained so the
/// turn itself still succeeds.
async fn log_turn(
    pool: &SqlitePool,
    phone: &str,
    user_input: &str,
    bot_response: &str,
    response_time: Option<f64>,
    status: TurnStatus,
) {
    if let Err(e) =
        history::append_turn(pool, phone, user_input, bot_response, response_time, status).await
    {
        tracing::warn!(phone = %phone, error = %e, "Failed to append conversation log entry");
    }
}
