use axum::{
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use parley_core::{ConversationId, MessageId, PollId, UserId};
use serde::{Deserialize, Serialize};

use super::{
    core::METRICS_TEXT_CONTENT_TYPE,
    metrics::render_metrics,
    store::{PollOptionRecord, PollOptionResult},
};

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(crate) async fn metrics() -> Response {
    (
        [(CONTENT_TYPE, METRICS_TEXT_CONTENT_TYPE)],
        render_metrics(),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: &'static str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GatewayAuthQuery {
    pub(crate) token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationPath {
    pub(crate) conversation_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagePath {
    pub(crate) message_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PollPath {
    pub(crate) poll_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateMessageRequest {
    pub(crate) content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageResponse {
    pub(crate) message_id: MessageId,
    pub(crate) conversation_id: ConversationId,
    pub(crate) sender_id: UserId,
    pub(crate) content: String,
    pub(crate) message_type: &'static str,
    pub(crate) created_at: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadReceiptResponse {
    pub(crate) recorded: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreatePollRequest {
    pub(crate) question: String,
    pub(crate) options: Vec<String>,
    #[serde(default)]
    pub(crate) is_multiple_choice: bool,
    #[serde(default)]
    pub(crate) expires_in_hours: Option<u32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreatePollResponse {
    pub(crate) poll_id: PollId,
    pub(crate) message_id: MessageId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CastVoteRequest {
    pub(crate) option_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct PollVoteResponse {
    pub(crate) results: Vec<PollOptionResult>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PollResponse {
    pub(crate) poll_id: PollId,
    pub(crate) message_id: MessageId,
    pub(crate) conversation_id: ConversationId,
    pub(crate) question: String,
    pub(crate) options: Vec<PollOptionRecord>,
    pub(crate) is_multiple_choice: bool,
    pub(crate) expires_at: Option<i64>,
    pub(crate) is_expired: bool,
    pub(crate) created_by: UserId,
    pub(crate) created_at: i64,
    pub(crate) results: Vec<PollOptionResult>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    pub(crate) limit: Option<u32>,
    pub(crate) before: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageHistoryResponse {
    pub(crate) messages: Vec<MessageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct OpenPersonalRequest {
    pub(crate) user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateGroupRequest {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) member_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AddMemberRequest {
    pub(crate) user_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddMemberResponse {
    pub(crate) added: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConversationResponse {
    pub(crate) conversation_id: ConversationId,
    pub(crate) kind: &'static str,
    pub(crate) name: Option<String>,
    pub(crate) created_by: UserId,
    pub(crate) created_at: i64,
    pub(crate) members: Vec<UserId>,
    pub(crate) last_message: Option<MessageResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConversationListResponse {
    pub(crate) conversations: Vec<ConversationResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConversationStatsResponse {
    pub(crate) total_members: u64,
    pub(crate) active_members: u64,
    pub(crate) total_messages: u64,
}
