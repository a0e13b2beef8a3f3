#![forbid(unsafe_code)]

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returns the project code name.
#[must_use]
pub const fn project_name() -> &'static str {
    "parley"
}

pub const MAX_MESSAGE_CONTENT_BYTES: usize = 2000;
pub const MAX_POLL_QUESTION_BYTES: usize = 300;
pub const MAX_POLL_OPTION_BYTES: usize = 100;
pub const MIN_POLL_OPTIONS: usize = 2;
pub const MAX_POLL_OPTIONS: usize = 10;
pub const MAX_GROUP_NAME_BYTES: usize = 100;
const MAX_STATUS_CHARS: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("user id is invalid")]
    InvalidUserId,
    #[error("conversation id is invalid")]
    InvalidConversationId,
    #[error("message id is invalid")]
    InvalidMessageId,
    #[error("poll id is invalid")]
    InvalidPollId,
    #[error("poll option id is invalid")]
    InvalidPollOptionId,
    #[error("user status is invalid")]
    InvalidUserStatus,
    #[error("message content is invalid")]
    InvalidMessageContent,
    #[error("poll question is invalid")]
    InvalidPollQuestion,
    #[error("poll options are invalid")]
    InvalidPollOptions,
    #[error("group name is invalid")]
    InvalidGroupName,
}

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $error:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub const fn from_uuid(value: Uuid) -> Self {
                Self(value)
            }

            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::try_from(value.as_str())
            }
        }

        impl TryFrom<&str> for $name {
            type Error = DomainError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Uuid::parse_str(value).map(Self).map_err(|_| $error)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0.to_string()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Subject of an access token and owner of live connections.
    UserId,
    DomainError::InvalidUserId
);
uuid_identifier!(ConversationId, DomainError::InvalidConversationId);
uuid_identifier!(MessageId, DomainError::InvalidMessageId);
uuid_identifier!(PollId, DomainError::InvalidPollId);
uuid_identifier!(PollOptionId, DomainError::InvalidPollOptionId);

/// Presence label persisted on the user record.
///
/// The gateway writes [`UserStatus::online`] and [`UserStatus::offline`] on
/// connection transitions; clients may set any other short label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserStatus(String);

impl UserStatus {
    pub const ONLINE: &'static str = "online";
    pub const OFFLINE: &'static str = "offline";

    #[must_use]
    pub fn online() -> Self {
        Self(String::from(Self::ONLINE))
    }

    #[must_use]
    pub fn offline() -> Self {
        Self(String::from(Self::OFFLINE))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.0 == Self::ONLINE
    }
}

impl TryFrom<String> for UserStatus {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_status(&value)?;
        Ok(Self(value))
    }
}

impl From<UserStatus> for String {
    fn from(value: UserStatus) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageContent(String);

impl MessageContent {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MessageContent {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_text(&value, MAX_MESSAGE_CONTENT_BYTES)
            .map_err(|()| DomainError::InvalidMessageContent)?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollQuestion(String);

impl PollQuestion {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PollQuestion {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_text(&value, MAX_POLL_QUESTION_BYTES)
            .map_err(|()| DomainError::InvalidPollQuestion)?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupName(String);

impl GroupName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for GroupName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        validate_text(trimmed, MAX_GROUP_NAME_BYTES)
            .map_err(|()| DomainError::InvalidGroupName)?;
        if trimmed.contains(['\n', '\t']) {
            return Err(DomainError::InvalidGroupName);
        }
        Ok(Self(trimmed.to_owned()))
    }
}

/// Ordered, de-duplicated option labels for a new poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions(Vec<String>);

impl PollOptions {
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl TryFrom<Vec<String>> for PollOptions {
    type Error = DomainError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        if !(MIN_POLL_OPTIONS..=MAX_POLL_OPTIONS).contains(&value.len()) {
            return Err(DomainError::InvalidPollOptions);
        }
        let mut seen = HashSet::new();
        for option in &value {
            validate_text(option, MAX_POLL_OPTION_BYTES)
                .map_err(|()| DomainError::InvalidPollOptions)?;
            if !seen.insert(option.trim().to_lowercase()) {
                return Err(DomainError::InvalidPollOptions);
            }
        }
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteMode {
    Single,
    Multiple,
}

impl VoteMode {
    #[must_use]
    pub const fn from_multiple_choice(is_multiple_choice: bool) -> Self {
        if is_multiple_choice {
            Self::Multiple
        } else {
            Self::Single
        }
    }

    /// Single-choice polls replace the voter's earlier selection.
    #[must_use]
    pub const fn replaces_previous_vote(self) -> bool {
        matches!(self, Self::Single)
    }
}

/// A poll without an expiry never closes. Expiry is exclusive of the instant itself.
#[must_use]
pub fn poll_is_expired(expires_at_unix_ms: Option<i64>, now_unix_ms: i64) -> bool {
    expires_at_unix_ms.is_some_and(|expires_at| expires_at < now_unix_ms)
}

fn validate_status(value: &str) -> Result<(), DomainError> {
    if !(1..=MAX_STATUS_CHARS).contains(&value.len()) {
        return Err(DomainError::InvalidUserStatus);
    }

    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Ok(());
    }

    Err(DomainError::InvalidUserStatus)
}

fn validate_text(value: &str, max_bytes: usize) -> Result<(), ()> {
    if value.trim().is_empty() || value.len() > max_bytes {
        return Err(());
    }
    if value.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(());
    }
    Ok(())
}
