use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use parley_core::{ConversationId, GroupName, MessageId, UserId};

use crate::server::{
    auth::authenticate,
    chat::{
        add_group_member, conversation_history, conversation_stats, create_group,
        list_conversations, open_personal_conversation, ConversationOverview,
    },
    core::AppState,
    errors::ChatFailure,
    store::MembershipOutcome,
    types::{
        AddMemberRequest, AddMemberResponse, ConversationListResponse, ConversationPath,
        ConversationResponse, ConversationStatsResponse, CreateGroupRequest, HistoryQuery,
        MessageHistoryResponse, OpenPersonalRequest,
    },
};

impl From<ConversationOverview> for ConversationResponse {
    fn from(overview: ConversationOverview) -> Self {
        let conversation = overview.conversation;
        Self {
            conversation_id: conversation.conversation_id,
            kind: conversation.kind.as_str(),
            name: conversation.name,
            created_by: conversation.created_by,
            created_at: conversation.created_at,
            members: overview.members,
            last_message: overview.last_message.map(Into::into),
        }
    }
}

pub(crate) async fn get_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConversationListResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;

    let overviews = list_conversations(&state, identity.user_id).await?;
    Ok(Json(ConversationListResponse {
        conversations: overviews.into_iter().map(Into::into).collect(),
    }))
}

pub(crate) async fn open_personal_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<OpenPersonalRequest>,
) -> Result<Json<ConversationResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let other = UserId::try_from(payload.user_id)?;

    let overview = open_personal_conversation(&state, identity.user_id, other).await?;
    Ok(Json(overview.into()))
}

pub(crate) async fn create_group_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ConversationResponse>), ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let name = GroupName::try_from(payload.name)?;
    let member_ids = payload
        .member_ids
        .into_iter()
        .map(UserId::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let overview = create_group(&state, identity.user_id, name, &member_ids).await?;
    Ok((StatusCode::CREATED, Json(overview.into())))
}

pub(crate) async fn add_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<ConversationPath>,
    Json(payload): Json<AddMemberRequest>,
) -> Result<Json<AddMemberResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let conversation_id = ConversationId::try_from(path.conversation_id)?;
    let user_id = UserId::try_from(payload.user_id)?;

    let outcome = add_group_member(&state, identity.user_id, conversation_id, user_id).await?;
    Ok(Json(AddMemberResponse {
        added: outcome == MembershipOutcome::Added,
    }))
}

pub(crate) async fn get_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<ConversationPath>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessageHistoryResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let conversation_id = ConversationId::try_from(path.conversation_id)?;
    let before = query.before.map(MessageId::try_from).transpose()?;

    let messages =
        conversation_history(&state, identity.user_id, conversation_id, query.limit, before)
            .await?;
    Ok(Json(MessageHistoryResponse {
        messages: messages.into_iter().map(Into::into).collect(),
    }))
}

/// Presence is observed here, not pushed: `active_members` counts members
/// currently marked online.
pub(crate) async fn get_conversation_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<ConversationPath>,
) -> Result<Json<ConversationStatsResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let conversation_id = ConversationId::try_from(path.conversation_id)?;

    let stats = conversation_stats(&state, identity.user_id, conversation_id).await?;
    Ok(Json(ConversationStatsResponse {
        total_members: stats.total_members,
        active_members: stats.active_members,
        total_messages: stats.total_messages,
    }))
}
