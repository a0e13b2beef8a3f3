use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use parley_core::{ConversationId, PollId, PollOptionId, PollOptions, PollQuestion};

use crate::server::{
    auth::{authenticate, now_unix_millis},
    chat::{self, cast_poll_vote, poll_with_results, NewPoll},
    core::AppState,
    errors::ChatFailure,
    types::{
        CastVoteRequest, ConversationPath, CreatePollRequest, CreatePollResponse, PollPath,
        PollResponse, PollVoteResponse,
    },
};

pub(crate) async fn create_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<ConversationPath>,
    Json(payload): Json<CreatePollRequest>,
) -> Result<Json<CreatePollResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let conversation_id = ConversationId::try_from(path.conversation_id)?;
    let request = NewPoll {
        question: PollQuestion::try_from(payload.question)?,
        options: PollOptions::try_from(payload.options)?,
        is_multiple_choice: payload.is_multiple_choice,
        expires_in_hours: payload.expires_in_hours,
    };

    let poll = chat::create_poll(&state, identity.user_id, conversation_id, request).await?;
    Ok(Json(CreatePollResponse {
        poll_id: poll.poll_id,
        message_id: poll.message_id,
    }))
}

pub(crate) async fn vote_in_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<PollPath>,
    Json(payload): Json<CastVoteRequest>,
) -> Result<Json<PollVoteResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let poll_id = PollId::try_from(path.poll_id)?;
    let option_id = PollOptionId::try_from(payload.option_id)?;

    let results = cast_poll_vote(&state, identity.user_id, poll_id, option_id).await?;
    Ok(Json(PollVoteResponse { results }))
}

pub(crate) async fn get_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<PollPath>,
) -> Result<Json<PollResponse>, ChatFailure> {
    let identity = authenticate(&state, &headers)?;
    let poll_id = PollId::try_from(path.poll_id)?;

    let (poll, results) = poll_with_results(&state, identity.user_id, poll_id).await?;
    Ok(Json(PollResponse {
        is_expired: poll.is_expired(now_unix_millis()),
        poll_id: poll.poll_id,
        message_id: poll.message_id,
        conversation_id: poll.conversation_id,
        question: poll.question,
        options: poll.options,
        is_multiple_choice: poll.is_multiple_choice,
        expires_at: poll.expires_at,
        created_by: poll.created_by,
        created_at: poll.created_at,
        results,
    }))
}
