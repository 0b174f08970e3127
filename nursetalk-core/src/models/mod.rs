pub mod conversation;

pub use conversation::{ConversationTurn, TurnStatus};
