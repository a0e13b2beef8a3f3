use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parley_core::{
    ConversationId, MessageId, PollId, PollOptionId, UserId, UserStatus,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::server::{
    auth::now_unix_millis,
    core::{AppConfig, AppState, ConnectionControl},
    realtime::{admission::admit, connection_registry::ConnectionHandle},
    store::{
        ChatStore, ConversationRecord, ConversationStats, InMemoryChatStore, MemberRole,
        MembershipOutcome, MessageKind, MessageRecord, PollOptionRecord, PollOptionResult,
        PollRecord, ReceiptOutcome, StoreError, UserRecord, VoteOutcome,
    },
};

pub(crate) const TEST_SECRET: &str = "scenario-secret";

pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        token_secret: String::from(TEST_SECRET),
        gateway_outbound_queue: 16,
        ..AppConfig::default()
    }
}

pub(crate) fn state_with(store: &InMemoryChatStore) -> AppState {
    AppState::with_store(&test_config(), Arc::new(store.clone())).expect("state should build")
}

/// Seeds one user per name and a conversation holding all of them.
pub(crate) async fn seed_conversation(
    store: &InMemoryChatStore,
    names: &[&str],
) -> (ConversationId, Vec<UserId>) {
    let mut users = Vec::with_capacity(names.len());
    for name in names {
        let user_id = UserId::new();
        store.insert_user(UserRecord::new(user_id, *name)).await;
        users.push(user_id);
    }
    let conversation_id = ConversationId::new();
    store.insert_conversation(conversation_id, &users).await;
    (conversation_id, users)
}

pub(crate) async fn seed_expired_poll(
    store: &InMemoryChatStore,
    conversation_id: ConversationId,
    creator: UserId,
) -> PollRecord {
    let created_at = now_unix_millis() - 2 * 60 * 60 * 1000;
    let message = MessageRecord {
        message_id: MessageId::new(),
        conversation_id,
        sender_id: creator,
        content: String::from("Standup time?"),
        message_type: MessageKind::Poll,
        created_at,
    };
    let poll = PollRecord {
        poll_id: PollId::new(),
        message_id: message.message_id,
        conversation_id,
        question: message.content.clone(),
        is_multiple_choice: false,
        expires_at: Some(created_at + 60 * 60 * 1000),
        created_by: creator,
        created_at,
        options: ["9:00", "10:00"]
            .into_iter()
            .map(|text| PollOptionRecord {
                id: PollOptionId::new(),
                text: text.to_owned(),
            })
            .collect(),
    };
    store
        .create_poll(&message, &poll)
        .await
        .expect("expired poll should be stored");
    poll
}

/// Registry-side view of one fake connection.
pub(crate) struct Attached {
    pub(crate) connection_id: Uuid,
    pub(crate) outbound: mpsc::Receiver<String>,
    pub(crate) control: watch::Receiver<ConnectionControl>,
}

/// Admits a fake connection the way the gateway does, presence included.
pub(crate) async fn attach(state: &AppState, user_id: UserId) -> Attached {
    attach_with_capacity(state, user_id, 16).await
}

pub(crate) async fn attach_with_capacity(
    state: &AppState,
    user_id: UserId,
    capacity: usize,
) -> Attached {
    let (outbound, outbound_rx) = mpsc::channel(capacity);
    let (control, control_rx) = watch::channel(ConnectionControl::Open);
    let registration = admit(state, user_id, ConnectionHandle { outbound, control }).await;
    Attached {
        connection_id: registration.connection_id,
        outbound: outbound_rx,
        control: control_rx,
    }
}

pub(crate) fn drain_events(outbound: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(payload) = outbound.try_recv() {
        events.push(serde_json::from_str(&payload).expect("outbound payload should be json"));
    }
    events
}

/// Polls the store until the user's persisted status matches.
pub(crate) async fn wait_for_status(store: &InMemoryChatStore, user_id: UserId, expected: &str) {
    for _ in 0..100 {
        let user = store
            .find_user_profile(user_id)
            .await
            .expect("profile lookup should succeed")
            .expect("user should exist");
        if user.status.as_str() == expected && user.last_seen.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("user {user_id} never reached status {expected}");
}

/// Store double that fails selected lookups and delegates everything else.
pub(crate) struct FaultyStore {
    inner: InMemoryChatStore,
    fail_profiles: bool,
    fail_membership: bool,
}

impl FaultyStore {
    pub(crate) fn profile_outage(inner: InMemoryChatStore) -> Self {
        Self {
            inner,
            fail_profiles: true,
            fail_membership: false,
        }
    }

    pub(crate) fn membership_outage(inner: InMemoryChatStore) -> Self {
        Self {
            inner,
            fail_profiles: false,
            fail_membership: true,
        }
    }

    fn outage() -> StoreError {
        StoreError::Unavailable(String::from("injected outage"))
    }
}

#[async_trait]
impl ChatStore for FaultyStore {
    async fn find_user_profile(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        if self.fail_profiles {
            return Err(Self::outage());
        }
        self.inner.find_user_profile(user_id).await
    }

    async fn update_user_status(
        &self,
        user_id: UserId,
        status: &UserStatus,
        at_unix_ms: i64,
    ) -> Result<(), StoreError> {
        self.inner
            .update_user_status(user_id, status, at_unix_ms)
            .await
    }

    async fn create_conversation(
        &self,
        conversation: &ConversationRecord,
        members: &[UserId],
    ) -> Result<(), StoreError> {
        self.inner.create_conversation(conversation, members).await
    }

    async fn find_or_create_personal_conversation(
        &self,
        candidate: &ConversationRecord,
        other: UserId,
    ) -> Result<ConversationRecord, StoreError> {
        self.inner
            .find_or_create_personal_conversation(candidate, other)
            .await
    }

    async fn find_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        self.inner.find_conversation(conversation_id).await
    }

    async fn user_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        self.inner.user_conversations(user_id).await
    }

    async fn member_role(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<MemberRole>, StoreError> {
        self.inner.member_role(conversation_id, user_id).await
    }

    async fn add_conversation_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        role: MemberRole,
    ) -> Result<MembershipOutcome, StoreError> {
        self.inner
            .add_conversation_member(conversation_id, user_id, role)
            .await
    }

    async fn conversation_member_ids(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, StoreError> {
        if self.fail_membership {
            return Err(Self::outage());
        }
        self.inner.conversation_member_ids(conversation_id).await
    }

    async fn is_conversation_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        self.inner
            .is_conversation_member(conversation_id, user_id)
            .await
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.inner.insert_message(message).await
    }

    async fn find_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        self.inner.find_message(message_id).await
    }

    async fn conversation_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.inner
            .conversation_messages(conversation_id, limit, before)
            .await
    }

    async fn record_read_receipt(
        &self,
        message: &MessageRecord,
        reader: UserId,
        read_at_unix_ms: i64,
    ) -> Result<ReceiptOutcome, StoreError> {
        self.inner
            .record_read_receipt(message, reader, read_at_unix_ms)
            .await
    }

    async fn create_poll(
        &self,
        message: &MessageRecord,
        poll: &PollRecord,
    ) -> Result<(), StoreError> {
        self.inner.create_poll(message, poll).await
    }

    async fn find_poll(&self, poll_id: PollId) -> Result<Option<PollRecord>, StoreError> {
        self.inner.find_poll(poll_id).await
    }

    async fn record_poll_vote(
        &self,
        poll: &PollRecord,
        option_id: PollOptionId,
        voter: UserId,
        voted_at_unix_ms: i64,
    ) -> Result<VoteOutcome, StoreError> {
        self.inner
            .record_poll_vote(poll, option_id, voter, voted_at_unix_ms)
            .await
    }

    async fn poll_results(&self, poll: &PollRecord) -> Result<Vec<PollOptionResult>, StoreError> {
        self.inner.poll_results(poll).await
    }

    async fn conversation_stats(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationStats, StoreError> {
        self.inner.conversation_stats(conversation_id).await
    }
}
