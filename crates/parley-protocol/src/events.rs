use parley_core::{ConversationId, MessageContent, MessageId, PollId, PollOptionId, UserStatus};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use crate::{ProtocolError, MAX_EVENT_BYTES};

/// Outer shape of every client payload.
///
/// Unknown top-level fields (including any client-asserted `sender`) are
/// accepted and discarded.
#[derive(Debug, Deserialize)]
struct RawClientEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct TextData {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ReadReceiptData {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct UserStatusData {
    status: String,
}

#[derive(Debug, Deserialize)]
struct PollVoteData {
    poll_id: String,
    option_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEvent {
    pub conversation_id: ConversationId,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReceiptEvent {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatusEvent {
    pub status: UserStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollVoteEvent {
    pub poll_id: PollId,
    pub option_id: PollOptionId,
}

/// A decoded inbound event. Every variant carries validated domain values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Text(TextEvent),
    ReadReceipt(ReadReceiptEvent),
    UserStatus(UserStatusEvent),
    PollVote(PollVoteEvent),
}

impl ClientEvent {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::ReadReceipt(_) => "read_receipt",
            Self::UserStatus(_) => "user_status",
            Self::PollVote(_) => "poll",
        }
    }
}

/// Decode one inbound frame at the gateway boundary.
///
/// # Errors
/// Returns [`ProtocolError`] if the payload exceeds limits, is not JSON of the
/// expected outer shape, names an unknown event type, or lacks the fields its
/// type requires.
pub fn parse_client_event(input: &[u8]) -> Result<ClientEvent, ProtocolError> {
    if input.len() > MAX_EVENT_BYTES {
        return Err(ProtocolError::OversizedPayload {
            max: MAX_EVENT_BYTES,
            actual: input.len(),
        });
    }

    let raw: RawClientEvent = serde_json::from_slice(input)?;
    match raw.kind.as_str() {
        "text" => {
            let invalid = || ProtocolError::InvalidPayload { event_type: "text" };
            let conversation_id = raw
                .conversation_id
                .ok_or_else(invalid)
                .and_then(|value| ConversationId::try_from(value).map_err(|_| invalid()))?;
            let data: TextData = decode_data(raw.data, "text")?;
            let content = MessageContent::try_from(data.content).map_err(|_| invalid())?;
            Ok(ClientEvent::Text(TextEvent {
                conversation_id,
                content,
            }))
        }
        "read_receipt" => {
            let data: ReadReceiptData = decode_data(raw.data, "read_receipt")?;
            let message_id = MessageId::try_from(data.message_id).map_err(|_| {
                ProtocolError::InvalidPayload {
                    event_type: "read_receipt",
                }
            })?;
            Ok(ClientEvent::ReadReceipt(ReadReceiptEvent { message_id }))
        }
        "user_status" => {
            let data: UserStatusData = decode_data(raw.data, "user_status")?;
            let status =
                UserStatus::try_from(data.status).map_err(|_| ProtocolError::InvalidPayload {
                    event_type: "user_status",
                })?;
            Ok(ClientEvent::UserStatus(UserStatusEvent { status }))
        }
        "poll" => {
            let data: PollVoteData = decode_data(raw.data, "poll")?;
            let invalid = || ProtocolError::InvalidPayload { event_type: "poll" };
            Ok(ClientEvent::PollVote(PollVoteEvent {
                poll_id: PollId::try_from(data.poll_id).map_err(|_| invalid())?,
                option_id: PollOptionId::try_from(data.option_id).map_err(|_| invalid())?,
            }))
        }
        _ => Err(ProtocolError::UnknownEventType(raw.kind)),
    }
}

fn decode_data<T: DeserializeOwned>(
    data: Value,
    event_type: &'static str,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|_| ProtocolError::InvalidPayload { event_type })
}
