//! Symptom collection state machine.
//!
//! Pure decision logic: given the session record and the incoming message,
//! decide whether to keep collecting symptoms or finalize and request a
//! diagnosis. No I/O happens here — the orchestrator in the server crate
//! acts on the returned `TurnDecision`.
//!
//! Quick replies (greetings, thanks, goodbyes) are matched BEFORE the
//! per-state transitions and never touch the session at all.

use crate::session::{ConversationSession, SessionState};

pub const GREETING_REPLY: &str = "Hello! I'm your health assistant. \
Please describe your symptoms one at a time, and say \"done\" when you have listed them all.";

pub const GRATITUDE_REPLY: &str =
    "You're welcome! Don't hesitate to reach out if you need anything else.";

pub const FAREWELL_REPLY: &str =
    "Take care! Remember to reach out if you need any health advice.";

pub const ACK_PROMPT: &str = "I've noted that. Is there anything else about the symptoms?";

pub const NO_SYMPTOMS_PROMPT: &str = "I haven't recorded any symptoms yet. \
Please describe at least one symptom so I can help.";

pub const EMPTY_MESSAGE_PROMPT: &str =
    "I didn't receive any message. Please describe your symptoms.";

pub const APOLOGY_REPLY: &str = "I apologize, but I'm having trouble processing your request. \
Please try again in a moment.";

const GREETING_WORDS: &[&str] = &["hi", "hello", "hey"];
const GRATITUDE_WORDS: &[&str] = &["thank you", "thanks", "thx"];
const FAREWELL_WORDS: &[&str] = &["bye", "goodbye", "good bye"];

const FINISHING_WORDS: &[&str] = &[
    "no",
    "nope",
    "nah",
    "thats all",
    "that's all",
    "done",
    "finished",
];

/// What the orchestrator should do with this turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDecision {
    /// Reply with the acknowledgment prompt; the symptom was recorded.
    Acknowledge,
    /// All symptoms collected — run the generator on the combined complaint.
    /// The session has already been reset.
    Finalize { combined_symptoms: String },
    /// The user said "done" with nothing collected. The session has been
    /// reset; ask for at least one symptom instead of generating.
    AskForFirstSymptom,
    /// Empty or whitespace-only input. Session untouched.
    PromptForInput,
}

/// Canned reply for greetings, gratitude and farewells, checked before the
/// per-state transitions. Returns `None` when the message needs the state
/// machine.
pub fn quick_reply(message: &str) -> Option<&'static str> {
    let normalized = message.trim().to_lowercase();
    if GREETING_WORDS.contains(&normalized.as_str()) {
        return Some(GREETING_REPLY);
    }
    if GRATITUDE_WORDS.contains(&normalized.as_str()) {
        return Some(GRATITUDE_REPLY);
    }
    if FAREWELL_WORDS.contains(&normalized.as_str()) {
        return Some(FAREWELL_REPLY);
    }
    None
}

fn is_finishing_word(message: &str) -> bool {
    let normalized = message.trim().to_lowercase();
    FINISHING_WORDS.contains(&normalized.as_str())
}

/// Advance the state machine one turn, mutating the session in place.
///
/// Callers must have handled `quick_reply` first; a greeting that reaches
/// this function is treated as a symptom description.
pub fn advance(session: &mut ConversationSession, message: &str) -> TurnDecision {
    let message = message.trim();
    if message.is_empty() {
        return TurnDecision::PromptForInput;
    }

    match session.state {
        SessionState::Greeting => {
            session.state = SessionState::CollectingSymptoms;
            session.append_symptom(message);
            TurnDecision::Acknowledge
        }
        SessionState::CollectingSymptoms => {
            if is_finishing_word(message) {
                if session.symptom_history.is_empty() {
                    session.reset();
                    return TurnDecision::AskForFirstSymptom;
                }
                let combined_symptoms = session.symptom_history.join(". ");
                session.reset();
                TurnDecision::Finalize { combined_symptoms }
            } else {
                session.append_symptom(message);
                TurnDecision::Acknowledge
            }
        }
    }
}
