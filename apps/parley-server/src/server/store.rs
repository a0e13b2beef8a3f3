use async_trait::async_trait;
use parley_core::{
    poll_is_expired, ConversationId, MessageId, PollId, PollOptionId, UserId, UserStatus, VoteMode,
};
use parley_protocol::SenderProfile;
use serde::Serialize;

mod in_memory;
mod postgres;

pub use in_memory::InMemoryChatStore;
pub use postgres::PgChatStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("stored record is malformed: {0}")]
    Corrupt(&'static str),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(error.to_string())
            }
            other => Self::Database(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub last_seen: Option<i64>,
}

impl UserRecord {
    /// Fresh offline user with no avatar.
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            avatar_url: None,
            status: UserStatus::offline(),
            last_seen: None,
        }
    }

    #[must_use]
    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    #[must_use]
    pub fn sender_profile(&self) -> SenderProfile {
        SenderProfile {
            id: self.id,
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Poll,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Poll => "poll",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "poll" => Some(Self::Poll),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Personal,
    Group,
}

impl ConversationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Group => "group",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "personal" => Some(Self::Personal),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// A conversation row. `name` is only set for groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationRecord {
    pub conversation_id: ConversationId,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub created_by: UserId,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollOptionRecord {
    pub id: PollOptionId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollRecord {
    pub poll_id: PollId,
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub question: String,
    pub is_multiple_choice: bool,
    pub expires_at: Option<i64>,
    pub created_by: UserId,
    pub created_at: i64,
    pub options: Vec<PollOptionRecord>,
}

impl PollRecord {
    #[must_use]
    pub const fn vote_mode(&self) -> VoteMode {
        VoteMode::from_multiple_choice(self.is_multiple_choice)
    }

    #[must_use]
    pub fn is_expired(&self, now_unix_ms: i64) -> bool {
        poll_is_expired(self.expires_at, now_unix_ms)
    }

    #[must_use]
    pub fn has_option(&self, option_id: PollOptionId) -> bool {
        self.options.iter().any(|option| option.id == option_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollVoter {
    pub id: UserId,
    pub username: String,
}

/// Tally for one option, in the poll's option order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollOptionResult {
    pub option_id: PollOptionId,
    pub option_text: String,
    pub vote_count: u64,
    pub voters: Vec<PollVoter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    pub total_members: u64,
    pub active_members: u64,
    pub total_messages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Recorded,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOutcome {
    Added,
    AlreadyMember,
}

/// Relational data service backing users, conversations, messages and polls.
///
/// Every call is a single asynchronous round trip. Implementations do not
/// retry.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_user_profile(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Fails with [`StoreError::NotFound`] when the user does not exist.
    async fn update_user_status(
        &self,
        user_id: UserId,
        status: &UserStatus,
        at_unix_ms: i64,
    ) -> Result<(), StoreError>;

    /// Stores `conversation` with its creator as admin and every other
    /// listed user as a plain member. Fails with [`StoreError::NotFound`]
    /// when a listed user does not exist.
    async fn create_conversation(
        &self,
        conversation: &ConversationRecord,
        members: &[UserId],
    ) -> Result<(), StoreError>;

    /// Returns the personal conversation between `candidate.created_by` and
    /// `other`, storing `candidate` when the pair has none yet.
    async fn find_or_create_personal_conversation(
        &self,
        candidate: &ConversationRecord,
        other: UserId,
    ) -> Result<ConversationRecord, StoreError>;

    async fn find_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationRecord>, StoreError>;

    /// Conversations `user_id` belongs to, newest first.
    async fn user_conversations(&self, user_id: UserId)
        -> Result<Vec<ConversationRecord>, StoreError>;

    async fn member_role(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<MemberRole>, StoreError>;

    async fn add_conversation_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        role: MemberRole,
    ) -> Result<MembershipOutcome, StoreError>;

    async fn conversation_member_ids(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, StoreError>;

    async fn is_conversation_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, StoreError>;

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError>;

    async fn find_message(&self, message_id: MessageId)
        -> Result<Option<MessageRecord>, StoreError>;

    /// At most `limit` messages, newest first. With `before`, only messages
    /// sent earlier than that message are returned; an id outside the
    /// conversation is [`StoreError::NotFound`].
    async fn conversation_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    /// Records `reader` as having read `message` and advances the reader's
    /// last-read marker for the conversation. A repeated receipt is reported
    /// as [`ReceiptOutcome::Duplicate`] and leaves state untouched.
    async fn record_read_receipt(
        &self,
        message: &MessageRecord,
        reader: UserId,
        read_at_unix_ms: i64,
    ) -> Result<ReceiptOutcome, StoreError>;

    /// Persists the poll-typed message and the poll with its options together.
    async fn create_poll(&self, message: &MessageRecord, poll: &PollRecord)
        -> Result<(), StoreError>;

    async fn find_poll(&self, poll_id: PollId) -> Result<Option<PollRecord>, StoreError>;

    /// Single-choice polls replace the voter's earlier selection. Voting for
    /// an option the voter already holds is [`VoteOutcome::Duplicate`].
    async fn record_poll_vote(
        &self,
        poll: &PollRecord,
        option_id: PollOptionId,
        voter: UserId,
        voted_at_unix_ms: i64,
    ) -> Result<VoteOutcome, StoreError>;

    async fn poll_results(&self, poll: &PollRecord) -> Result<Vec<PollOptionResult>, StoreError>;

    async fn conversation_stats(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationStats, StoreError>;
}
