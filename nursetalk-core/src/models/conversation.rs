use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound/outbound exchange attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConversationTurn {
    pub id: i64,
    pub phone_number: String,
    pub timestamp: DateTime<Utc>,
    pub user_input: String,
    pub bot_response: String,
    pub response_time: Option<f64>,
    pub status: String,
}

/// Outcome tag recorded with each conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Final formatted diagnosis delivered.
    Sent,
    /// Generation or delivery failed; the user got an apology instead.
    Failed,
    /// Mid-collection acknowledgment or input prompt.
    Processing,
    /// Canned reply handled without the generator.
    QuickResponse,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Sent => "sent",
            TurnStatus::Failed => "failed",
            TurnStatus::Processing => "processing",
            TurnStatus::QuickResponse => "quick_response",
        }
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
