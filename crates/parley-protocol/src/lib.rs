#![forbid(unsafe_code)]

mod events;

use parley_core::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use events::{
    parse_client_event, ClientEvent, PollVoteEvent, ReadReceiptEvent, TextEvent, UserStatusEvent,
};

/// Maximum allowed gateway payload bytes.
pub const MAX_EVENT_BYTES: usize = 64 * 1024;

/// Discriminator shared by inbound client events and outbound envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Text,
    ReadReceipt,
    UserStatus,
    Poll,
    Error,
    Connection,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::ReadReceipt => "read_receipt",
            Self::UserStatus => "user_status",
            Self::Poll => "poll",
            Self::Error => "error",
            Self::Connection => "connection",
        }
    }
}

/// Display metadata attached to every fanned-out envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Unit of data pushed to a live connection.
///
/// `sender` is filled in by the server at fan-out time and is never read
/// from client input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub conversation_id: String,
    pub sender_id: UserId,
    pub timestamp: i64,
    pub sender: Option<SenderProfile>,
}

impl Envelope {
    #[must_use]
    pub fn new(
        kind: EventKind,
        conversation_id: impl Into<String>,
        sender_id: UserId,
        data: Value,
        timestamp: i64,
    ) -> Self {
        Self {
            kind,
            data,
            conversation_id: conversation_id.into(),
            sender_id,
            timestamp,
            sender: None,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: Option<SenderProfile>) -> Self {
        self.sender = sender;
        self
    }
}

/// First frame sent on an admitted connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAck {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub status: String,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub timestamp: i64,
}

impl ConnectionAck {
    #[must_use]
    pub fn connected(user_id: UserId, timestamp: i64) -> Self {
        Self {
            kind: EventKind::Connection,
            status: String::from("connected"),
            user_id,
            timestamp,
        }
    }
}

/// Error reported on the connection that sent the offending payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
}

impl ErrorNotice {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload exceeds max size: max={max} bytes actual={actual} bytes")]
    OversizedPayload { max: usize, actual: usize },
    #[error("invalid json payload")]
    InvalidJson,
    #[error("unknown event type `{0}`")]
    UnknownEventType(String),
    #[error("invalid `{event_type}` payload")]
    InvalidPayload { event_type: &'static str },
}

impl ProtocolError {
    /// Stable label used for metrics and client-facing error notices.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::OversizedPayload { .. } => "oversized_payload",
            Self::InvalidJson => "invalid_json",
            Self::UnknownEventType(_) => "unknown_event",
            Self::InvalidPayload { event_type } => match *event_type {
                "text" => "invalid_text_payload",
                "read_receipt" => "invalid_read_receipt_payload",
                "user_status" => "invalid_user_status_payload",
                "poll" => "invalid_poll_payload",
                _ => "invalid_payload",
            },
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}
