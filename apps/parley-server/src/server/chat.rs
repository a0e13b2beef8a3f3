use parley_core::{
    ConversationId, GroupName, MessageContent, MessageId, PollId, PollOptionId, PollOptions,
    PollQuestion, UserId, UserStatus,
};
use parley_protocol::{Envelope, EventKind};
use serde::Serialize;

use super::{
    auth::now_unix_millis,
    core::{AppState, DEFAULT_HISTORY_PAGE, MAX_HISTORY_PAGE, MAX_POLL_EXPIRY_HOURS},
    errors::ChatFailure,
    metrics::record_gateway_event_serialize_error,
    store::{
        ConversationKind, ConversationRecord, ConversationStats, MemberRole, MembershipOutcome,
        MessageKind, MessageRecord, PollOptionRecord, PollOptionResult, PollRecord,
        ReceiptOutcome, VoteOutcome,
    },
};

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

#[derive(Serialize)]
struct ReadReceiptData {
    message_id: MessageId,
    user_id: UserId,
    read_at: i64,
}

#[derive(Serialize)]
struct PollVoteData<'a> {
    poll_id: PollId,
    updated_results: &'a [PollOptionResult],
}

#[derive(Serialize)]
struct PollCreatedData<'a> {
    message_id: MessageId,
    poll_id: PollId,
    question: &'a str,
    options: &'a [PollOptionRecord],
    is_multiple_choice: bool,
    expires_at: Option<i64>,
}

async fn require_member(
    state: &AppState,
    conversation_id: ConversationId,
    user_id: UserId,
) -> Result<(), ChatFailure> {
    if state
        .store
        .is_conversation_member(conversation_id, user_id)
        .await?
    {
        Ok(())
    } else {
        Err(ChatFailure::Forbidden)
    }
}

/// Live push after a durable write. Never fails the write.
async fn broadcast<T: Serialize>(
    state: &AppState,
    conversation_id: ConversationId,
    sender_id: UserId,
    kind: EventKind,
    data: &T,
) {
    let data = match serde_json::to_value(data) {
        Ok(data) => data,
        Err(error) => {
            tracing::error!(
                event = "chat.broadcast",
                conversation_id = %conversation_id,
                event_type = kind.as_str(),
                error = %error,
            );
            record_gateway_event_serialize_error("conversation", kind.as_str());
            return;
        }
    };
    let envelope = Envelope::new(
        kind,
        conversation_id.to_string(),
        sender_id,
        data,
        now_unix_millis(),
    );
    // Abandoned fan-outs are logged and counted by the dispatcher.
    let _ = state
        .fanout
        .send_to_conversation(conversation_id, envelope)
        .await;
}

pub(crate) async fn send_text_message(
    state: &AppState,
    sender_id: UserId,
    conversation_id: ConversationId,
    content: MessageContent,
) -> Result<MessageRecord, ChatFailure> {
    require_member(state, conversation_id, sender_id).await?;

    let message = MessageRecord {
        message_id: MessageId::new(),
        conversation_id,
        sender_id,
        content: content.into_string(),
        message_type: MessageKind::Text,
        created_at: now_unix_millis(),
    };
    state.store.insert_message(&message).await?;

    broadcast(state, conversation_id, sender_id, EventKind::Text, &message).await;
    Ok(message)
}

/// Reading one's own message and repeating a receipt both report
/// [`ReceiptOutcome::Duplicate`]. Every accepted receipt is pushed.
pub(crate) async fn mark_message_read(
    state: &AppState,
    reader: UserId,
    message_id: MessageId,
) -> Result<ReceiptOutcome, ChatFailure> {
    let message = state
        .store
        .find_message(message_id)
        .await?
        .ok_or(ChatFailure::NotFound)?;
    require_member(state, message.conversation_id, reader).await?;

    let read_at = now_unix_millis();
    let outcome = if message.sender_id == reader {
        ReceiptOutcome::Duplicate
    } else {
        state
            .store
            .record_read_receipt(&message, reader, read_at)
            .await?
    };
    broadcast(
        state,
        message.conversation_id,
        reader,
        EventKind::ReadReceipt,
        &ReadReceiptData {
            message_id,
            user_id: reader,
            read_at,
        },
    )
    .await;
    Ok(outcome)
}

pub(crate) async fn update_status(
    state: &AppState,
    user_id: UserId,
    status: &UserStatus,
) -> Result<(), ChatFailure> {
    state
        .store
        .update_user_status(user_id, status, now_unix_millis())
        .await?;
    Ok(())
}

/// Expiry is checked before anything is written.
pub(crate) async fn cast_poll_vote(
    state: &AppState,
    voter: UserId,
    poll_id: PollId,
    option_id: PollOptionId,
) -> Result<Vec<PollOptionResult>, ChatFailure> {
    let poll = state
        .store
        .find_poll(poll_id)
        .await?
        .ok_or(ChatFailure::NotFound)?;
    let now = now_unix_millis();
    if poll.is_expired(now) {
        return Err(ChatFailure::PollExpired);
    }
    if !poll.has_option(option_id) {
        return Err(ChatFailure::InvalidRequest);
    }
    require_member(state, poll.conversation_id, voter).await?;

    let outcome = state
        .store
        .record_poll_vote(&poll, option_id, voter, now)
        .await?;
    if outcome == VoteOutcome::Duplicate {
        tracing::debug!(event = "chat.vote", poll_id = %poll_id, outcome = "duplicate");
    }
    let results = state.store.poll_results(&poll).await?;
    broadcast(
        state,
        poll.conversation_id,
        voter,
        EventKind::Poll,
        &PollVoteData {
            poll_id,
            updated_results: &results,
        },
    )
    .await;
    Ok(results)
}

pub(crate) struct NewPoll {
    pub(crate) question: PollQuestion,
    pub(crate) options: PollOptions,
    pub(crate) is_multiple_choice: bool,
    pub(crate) expires_in_hours: Option<u32>,
}

pub(crate) async fn create_poll(
    state: &AppState,
    creator: UserId,
    conversation_id: ConversationId,
    request: NewPoll,
) -> Result<PollRecord, ChatFailure> {
    let now = now_unix_millis();
    let expires_at = match request.expires_in_hours {
        None => None,
        Some(hours) if (1..=MAX_POLL_EXPIRY_HOURS).contains(&hours) => {
            Some(now + i64::from(hours) * MILLIS_PER_HOUR)
        }
        Some(_) => return Err(ChatFailure::InvalidRequest),
    };
    require_member(state, conversation_id, creator).await?;

    let message = MessageRecord {
        message_id: MessageId::new(),
        conversation_id,
        sender_id: creator,
        content: request.question.as_str().to_owned(),
        message_type: MessageKind::Poll,
        created_at: now,
    };
    let poll = PollRecord {
        poll_id: PollId::new(),
        message_id: message.message_id,
        conversation_id,
        question: request.question.as_str().to_owned(),
        is_multiple_choice: request.is_multiple_choice,
        expires_at,
        created_by: creator,
        created_at: now,
        options: request
            .options
            .into_vec()
            .into_iter()
            .map(|text| PollOptionRecord {
                id: PollOptionId::new(),
                text,
            })
            .collect(),
    };
    state.store.create_poll(&message, &poll).await?;

    broadcast(
        state,
        conversation_id,
        creator,
        EventKind::Poll,
        &PollCreatedData {
            message_id: poll.message_id,
            poll_id: poll.poll_id,
            question: &poll.question,
            options: &poll.options,
            is_multiple_choice: poll.is_multiple_choice,
            expires_at: poll.expires_at,
        },
    )
    .await;
    Ok(poll)
}

pub(crate) async fn poll_with_results(
    state: &AppState,
    requester: UserId,
    poll_id: PollId,
) -> Result<(PollRecord, Vec<PollOptionResult>), ChatFailure> {
    let poll = state
        .store
        .find_poll(poll_id)
        .await?
        .ok_or(ChatFailure::NotFound)?;
    require_member(state, poll.conversation_id, requester).await?;
    let results = state.store.poll_results(&poll).await?;
    Ok((poll, results))
}

pub(crate) async fn conversation_stats(
    state: &AppState,
    requester: UserId,
    conversation_id: ConversationId,
) -> Result<ConversationStats, ChatFailure> {
    require_member(state, conversation_id, requester).await?;
    Ok(state.store.conversation_stats(conversation_id).await?)
}

/// A conversation as seen from its member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConversationOverview {
    pub(crate) conversation: ConversationRecord,
    pub(crate) members: Vec<UserId>,
    pub(crate) last_message: Option<MessageRecord>,
}

async fn overview(
    state: &AppState,
    conversation: ConversationRecord,
) -> Result<ConversationOverview, ChatFailure> {
    let conversation_id = conversation.conversation_id;
    let members = state.store.conversation_member_ids(conversation_id).await?;
    let last_message = state
        .store
        .conversation_messages(conversation_id, 1, None)
        .await?
        .into_iter()
        .next();
    Ok(ConversationOverview {
        conversation,
        members,
        last_message,
    })
}

pub(crate) async fn list_conversations(
    state: &AppState,
    user_id: UserId,
) -> Result<Vec<ConversationOverview>, ChatFailure> {
    let conversations = state.store.user_conversations(user_id).await?;
    let mut overviews = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        overviews.push(overview(state, conversation).await?);
    }
    Ok(overviews)
}

/// Newest first. `limit` defaults to one page and is capped.
pub(crate) async fn conversation_history(
    state: &AppState,
    requester: UserId,
    conversation_id: ConversationId,
    limit: Option<u32>,
    before: Option<MessageId>,
) -> Result<Vec<MessageRecord>, ChatFailure> {
    let limit = limit.unwrap_or(DEFAULT_HISTORY_PAGE);
    if !(1..=MAX_HISTORY_PAGE).contains(&limit) {
        return Err(ChatFailure::InvalidRequest);
    }
    require_member(state, conversation_id, requester).await?;
    Ok(state
        .store
        .conversation_messages(conversation_id, limit, before)
        .await?)
}

/// Returns the one personal conversation between the two users, creating
/// it on first use.
pub(crate) async fn open_personal_conversation(
    state: &AppState,
    user_id: UserId,
    other: UserId,
) -> Result<ConversationOverview, ChatFailure> {
    if other == user_id {
        return Err(ChatFailure::InvalidRequest);
    }
    if state.store.find_user_profile(other).await?.is_none() {
        return Err(ChatFailure::NotFound);
    }
    let candidate = ConversationRecord {
        conversation_id: ConversationId::new(),
        kind: ConversationKind::Personal,
        name: None,
        created_by: user_id,
        created_at: now_unix_millis(),
    };
    let conversation = state
        .store
        .find_or_create_personal_conversation(&candidate, other)
        .await?;
    overview(state, conversation).await
}

pub(crate) async fn create_group(
    state: &AppState,
    creator: UserId,
    name: GroupName,
    member_ids: &[UserId],
) -> Result<ConversationOverview, ChatFailure> {
    let mut members: Vec<UserId> = Vec::with_capacity(member_ids.len());
    for member in member_ids {
        if *member != creator && !members.contains(member) {
            members.push(*member);
        }
    }
    let conversation = ConversationRecord {
        conversation_id: ConversationId::new(),
        kind: ConversationKind::Group,
        name: Some(name.into_string()),
        created_by: creator,
        created_at: now_unix_millis(),
    };
    state
        .store
        .create_conversation(&conversation, &members)
        .await?;
    tracing::info!(
        event = "chat.group_created",
        conversation_id = %conversation.conversation_id,
        members = members.len() + 1,
    );
    members.insert(0, creator);
    Ok(ConversationOverview {
        conversation,
        members,
        last_message: None,
    })
}

/// Only group admins may add members, and only to groups.
pub(crate) async fn add_group_member(
    state: &AppState,
    actor: UserId,
    conversation_id: ConversationId,
    user_id: UserId,
) -> Result<MembershipOutcome, ChatFailure> {
    let conversation = state
        .store
        .find_conversation(conversation_id)
        .await?
        .ok_or(ChatFailure::NotFound)?;
    if state.store.member_role(conversation_id, actor).await? != Some(MemberRole::Admin) {
        return Err(ChatFailure::Forbidden);
    }
    if conversation.kind != ConversationKind::Group {
        return Err(ChatFailure::InvalidRequest);
    }
    Ok(state
        .store
        .add_conversation_member(conversation_id, user_id, MemberRole::Member)
        .await?)
}
