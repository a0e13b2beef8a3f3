use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use parley_core::{ConversationId, MessageContent, MessageId};

use crate::server::{
    auth::authenticate,
    chat::{mark_message_read, send_text_message},
    core::AppState,
    errors::ChatFailure,
    store::{MessageRecord, ReceiptOutcome},
    types::{
        ConversationPath, CreateMessageRequest, MessagePath, MessageResponse, ReadReceiptResponse,
    },
};

impl From<MessageRecord> for MessageResponse {
    fn from(message: MessageRecord) -> Self {
        Self {
            message_id: message.message_id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type.as_str(),
            created_at: message.created_at,
        }
    }
}

pub(crate) async fn create_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<ConversationPath>,
    Json(payload): Json<CreateMessageRequest>,
) -> Result<Json<MessageResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let conversation_id = ConversationId::try_from(path.conversation_id)?;
    let content = MessageContent::try_from(payload.content)?;

    let message = send_text_message(&state, identity.user_id, conversation_id, content).await?;
    Ok(Json(message.into()))
}

pub(crate) async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<MessagePath>,
) -> Result<Json<ReadReceiptResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let message_id = MessageId::try_from(path.message_id)?;

    let outcome = mark_message_read(&state, identity.user_id, message_id).await?;
    Ok(Json(ReadReceiptResponse {
        recorded: outcome == ReceiptOutcome::Recorded,
    }))
}
