pub mod config;
pub mod db;
pub mod dialogue;
pub mod error;
pub mod formatter;
pub mod generation;
pub mod messaging;
pub mod models;
pub mod phone;
pub mod session;
pub mod speech;

pub use config::NurseTalkConfig;
pub use dialogue::TurnDecision;
pub use error::NurseTalkError;
pub use formatter::format_response;
pub use generation::{Generation, GenerationError, InferenceTextGenerator, TextGenerator};
pub use messaging::{
    segment_body, DeliveryError, DeliveryReceipt, MessageSender, TwilioConfig,
    TwilioMessageSender, MAX_SEGMENT_CHARS,
};
pub use models::{ConversationTurn, TurnStatus};
pub use phone::{canonical_phone, whatsapp_address};
pub use session::{ConversationSession, InMemorySessionStore, SessionState, SessionStore};
pub use speech::{HttpSpeechSynthesizer, HttpSpeechTranscriber, SpeechSynthesizer, SpeechTranscriber};
