use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationStatus, Message};

/// Frames pushed from the server to connected clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionEstablished {
        user_id: String,
        conversation_id: Uuid,
        match_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    NewMessage {
        conversation_id: Uuid,
        match_id: Uuid,
        message: Message,
        timestamp: DateTime<Utc>,
    },
    ConversationStatusUpdate {
        conversation_id: Uuid,
        match_id: Uuid,
        status: StatusChange,
        timestamp: DateTime<Utc>,
    },
    MatchExpiryWarning {
        match_id: Uuid,
        time_left_seconds: i64,
        timestamp: DateTime<Utc>,
    },
    MatchExpired {
        match_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    Typing {
        user_id: String,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },
    Notification {
        heading: String,
        body: String,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusChange {
    pub status: ConversationStatus,
    /// Who caused the change: a participant regno, `admin`, or `system`.
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub is_blocked: bool,
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::NewMessage { .. } => "new_message",
            Self::ConversationStatusUpdate { .. } => "conversation_status_update",
            Self::MatchExpiryWarning { .. } => "match_expiry_warning",
            Self::MatchExpired { .. } => "match_expired",
            Self::Typing { .. } => "typing",
            Self::Notification { .. } => "notification",
            Self::Pong { .. } => "pong",
        }
    }
}

/// Frames a client may send. Anything that does not parse is ignored.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Typing { is_typing: bool },
}

impl ClientFrame {
    /// Accepts both the bare `ping` text frame and tagged JSON.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("ping") {
            return Some(Self::Ping);
        }
        serde_json::from_str(trimmed).ok()
    }
}
