use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{ConversationId, MessageId, PollId, PollOptionId, UserId, UserStatus};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use tokio::sync::OnceCell;

use super::{
    ChatStore, ConversationKind, ConversationRecord, ConversationStats, MemberRole,
    MembershipOutcome, MessageKind, MessageRecord, PollOptionRecord, PollOptionResult, PollRecord,
    PollVoter, ReceiptOutcome, StoreError, UserRecord, VoteOutcome,
};

const SCHEMA_INIT_LOCK_ID: i64 = 0x5041_524c_4559_0001;

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        user_id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        avatar_url TEXT NULL,
        status TEXT NOT NULL DEFAULT 'offline',
        last_seen_unix_ms BIGINT NULL
    )",
    "CREATE TABLE IF NOT EXISTS conversations (
        conversation_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        name TEXT NULL,
        created_by TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
        created_at_unix_ms BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS conversation_members (
        conversation_id TEXT NOT NULL REFERENCES conversations(conversation_id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
        role TEXT NOT NULL DEFAULT 'member',
        last_read_message_id TEXT NULL,
        PRIMARY KEY (conversation_id, user_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_conversation_members_user
        ON conversation_members(user_id)",
    "CREATE TABLE IF NOT EXISTS messages (
        message_id TEXT PRIMARY KEY,
        seq BIGINT GENERATED ALWAYS AS IDENTITY,
        conversation_id TEXT NOT NULL REFERENCES conversations(conversation_id) ON DELETE CASCADE,
        sender_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        message_type TEXT NOT NULL,
        created_at_unix_ms BIGINT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
        ON messages(conversation_id, seq DESC)",
    "CREATE TABLE IF NOT EXISTS read_receipts (
        message_id TEXT NOT NULL REFERENCES messages(message_id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
        read_at_unix_ms BIGINT NOT NULL,
        PRIMARY KEY (message_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS polls (
        poll_id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL UNIQUE REFERENCES messages(message_id) ON DELETE CASCADE,
        question TEXT NOT NULL,
        is_multiple_choice BOOLEAN NOT NULL,
        expires_at_unix_ms BIGINT NULL,
        created_by TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
        created_at_unix_ms BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS poll_options (
        option_id TEXT PRIMARY KEY,
        poll_id TEXT NOT NULL REFERENCES polls(poll_id) ON DELETE CASCADE,
        option_text TEXT NOT NULL,
        position INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS poll_votes (
        poll_id TEXT NOT NULL REFERENCES polls(poll_id) ON DELETE CASCADE,
        option_id TEXT NOT NULL REFERENCES poll_options(option_id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
        voted_at_unix_ms BIGINT NOT NULL,
        PRIMARY KEY (option_id, user_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_poll_votes_poll_user ON poll_votes(poll_id, user_id)",
];

/// [`ChatStore`] over a Postgres pool. The schema is bootstrapped once per
/// process on first use.
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgChatStore {
    /// # Errors
    /// Returns an error if the connection string cannot be parsed.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)?;
        Ok(Self::from_pool(pool))
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    /// # Errors
    /// Returns an error if the schema statements fail.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema_ready
            .get_or_try_init(|| async {
                let mut tx = self.pool.begin().await?;
                sqlx::query("SELECT pg_advisory_xact_lock($1)")
                    .bind(SCHEMA_INIT_LOCK_ID)
                    .execute(&mut *tx)
                    .await?;
                for statement in SCHEMA_STATEMENTS {
                    sqlx::query(statement).execute(&mut *tx).await?;
                }
                tx.commit().await?;
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                tracing::error!(event = "db.init", error = %e);
                StoreError::from(e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn find_user_profile(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT user_id, username, avatar_url, status, last_seen_unix_ms
             FROM users WHERE user_id = $1",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_user_status(
        &self,
        user_id: UserId,
        status: &UserStatus,
        at_unix_ms: i64,
    ) -> Result<(), StoreError> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            "UPDATE users SET status = $2, last_seen_unix_ms = $3 WHERE user_id = $1",
        )
        .bind(user_id.to_string())
        .bind(status.as_str())
        .bind(at_unix_ms)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_conversation(
        &self,
        conversation: &ConversationRecord,
        members: &[UserId],
    ) -> Result<(), StoreError> {
        self.ensure_schema().await?;
        let mut tx = self.pool.begin().await?;
        insert_conversation_rows(&mut tx, conversation, members).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_or_create_personal_conversation(
        &self,
        candidate: &ConversationRecord,
        other: UserId,
    ) -> Result<ConversationRecord, StoreError> {
        self.ensure_schema().await?;
        let creator = candidate.created_by;
        let pair_key = if creator.to_string() <= other.to_string() {
            format!("{creator}:{other}")
        } else {
            format!("{other}:{creator}")
        };
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(pair_key)
            .execute(&mut *tx)
            .await?;
        let existing = sqlx::query(
            "SELECT c.conversation_id, c.kind, c.name, c.created_by, c.created_at_unix_ms
             FROM conversations c
             JOIN conversation_members a
                ON a.conversation_id = c.conversation_id AND a.user_id = $1
             JOIN conversation_members b
                ON b.conversation_id = c.conversation_id AND b.user_id = $2
             WHERE c.kind = $3
             ORDER BY c.created_at_unix_ms
             LIMIT 1",
        )
        .bind(creator.to_string())
        .bind(other.to_string())
        .bind(ConversationKind::Personal.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            return conversation_from_row(&row);
        }
        insert_conversation_rows(&mut tx, candidate, &[other]).await?;
        tx.commit().await?;
        Ok(candidate.clone())
    }

    async fn find_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT conversation_id, kind, name, created_by, created_at_unix_ms
             FROM conversations WHERE conversation_id = $1",
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn user_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT c.conversation_id, c.kind, c.name, c.created_by, c.created_at_unix_ms
             FROM conversations c
             JOIN conversation_members cm ON cm.conversation_id = c.conversation_id
             WHERE cm.user_id = $1
             ORDER BY c.created_at_unix_ms DESC, c.conversation_id",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn member_role(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<MemberRole>, StoreError> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT role FROM conversation_members
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let role: String = row.try_get("role")?;
            MemberRole::parse(&role).ok_or(StoreError::Corrupt("conversation_members.role"))
        })
        .transpose()
    }

    async fn add_conversation_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        role: MemberRole,
    ) -> Result<MembershipOutcome, StoreError> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role)
             VALUES ($1, $2, $3)
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(conversation_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(missing_reference)?;
        if result.rows_affected() == 0 {
            Ok(MembershipOutcome::AlreadyMember)
        } else {
            Ok(MembershipOutcome::Added)
        }
    }

    async fn conversation_member_ids(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, StoreError> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_members
             WHERE conversation_id = $1 ORDER BY user_id",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| parse_id::<UserId>(row, "user_id"))
            .collect()
    }

    async fn is_conversation_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT 1 AS present FROM conversation_members
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.ensure_schema().await?;
        insert_message_row(&self.pool, message).await
    }

    async fn find_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT message_id, conversation_id, sender_id, content, message_type, created_at_unix_ms
             FROM messages WHERE message_id = $1",
        )
        .bind(message_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn conversation_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.ensure_schema().await?;
        let before_seq: Option<i64> = match before {
            None => None,
            Some(before) => {
                let row = sqlx::query(
                    "SELECT seq FROM messages WHERE message_id = $1 AND conversation_id = $2",
                )
                .bind(before.to_string())
                .bind(conversation_id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .ok_or(StoreError::NotFound)?;
                Some(row.try_get("seq")?)
            }
        };
        let rows = sqlx::query(
            "SELECT message_id, conversation_id, sender_id, content, message_type, created_at_unix_ms
             FROM messages
             WHERE conversation_id = $1 AND ($3::BIGINT IS NULL OR seq < $3)
             ORDER BY seq DESC
             LIMIT $2",
        )
        .bind(conversation_id.to_string())
        .bind(i64::from(limit))
        .bind(before_seq)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn record_read_receipt(
        &self,
        message: &MessageRecord,
        reader: UserId,
        read_at_unix_ms: i64,
    ) -> Result<ReceiptOutcome, StoreError> {
        self.ensure_schema().await?;
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO read_receipts (message_id, user_id, read_at_unix_ms)
             VALUES ($1, $2, $3)",
        )
        .bind(message.message_id.to_string())
        .bind(reader.to_string())
        .bind(read_at_unix_ms)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => return Ok(ReceiptOutcome::Duplicate),
            Err(error) => return Err(error.into()),
        }
        sqlx::query(
            "UPDATE conversation_members SET last_read_message_id = $3
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(message.conversation_id.to_string())
        .bind(reader.to_string())
        .bind(message.message_id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ReceiptOutcome::Recorded)
    }

    async fn create_poll(
        &self,
        message: &MessageRecord,
        poll: &PollRecord,
    ) -> Result<(), StoreError> {
        self.ensure_schema().await?;
        let mut tx = self.pool.begin().await?;
        insert_message_row(&mut *tx, message).await?;
        sqlx::query(
            "INSERT INTO polls
                (poll_id, message_id, question, is_multiple_choice, expires_at_unix_ms,
                 created_by, created_at_unix_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(poll.poll_id.to_string())
        .bind(poll.message_id.to_string())
        .bind(&poll.question)
        .bind(poll.is_multiple_choice)
        .bind(poll.expires_at)
        .bind(poll.created_by.to_string())
        .bind(poll.created_at)
        .execute(&mut *tx)
        .await?;
        for (position, option) in (0_i32..).zip(&poll.options) {
            sqlx::query(
                "INSERT INTO poll_options (option_id, poll_id, option_text, position)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(option.id.to_string())
            .bind(poll.poll_id.to_string())
            .bind(&option.text)
            .bind(position)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_poll(&self, poll_id: PollId) -> Result<Option<PollRecord>, StoreError> {
        self.ensure_schema().await?;
        let Some(row) = sqlx::query(
            "SELECT p.poll_id, p.message_id, m.conversation_id, p.question, p.is_multiple_choice,
                    p.expires_at_unix_ms, p.created_by, p.created_at_unix_ms
             FROM polls p JOIN messages m ON m.message_id = p.message_id
             WHERE p.poll_id = $1",
        )
        .bind(poll_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let option_rows = sqlx::query(
            "SELECT option_id, option_text FROM poll_options
             WHERE poll_id = $1 ORDER BY position",
        )
        .bind(poll_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let options = option_rows
            .iter()
            .map(|option| {
                Ok(PollOptionRecord {
                    id: parse_id(option, "option_id")?,
                    text: option.try_get("option_text")?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(PollRecord {
            poll_id: parse_id(&row, "poll_id")?,
            message_id: parse_id(&row, "message_id")?,
            conversation_id: parse_id(&row, "conversation_id")?,
            question: row.try_get("question")?,
            is_multiple_choice: row.try_get("is_multiple_choice")?,
            expires_at: row.try_get("expires_at_unix_ms")?,
            created_by: parse_id(&row, "created_by")?,
            created_at: row.try_get("created_at_unix_ms")?,
            options,
        }))
    }

    async fn record_poll_vote(
        &self,
        poll: &PollRecord,
        option_id: PollOptionId,
        voter: UserId,
        voted_at_unix_ms: i64,
    ) -> Result<VoteOutcome, StoreError> {
        self.ensure_schema().await?;
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT 1 AS present FROM poll_votes WHERE option_id = $1 AND user_id = $2",
        )
        .bind(option_id.to_string())
        .bind(voter.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Ok(VoteOutcome::Duplicate);
        }
        if poll.vote_mode().replaces_previous_vote() {
            sqlx::query("DELETE FROM poll_votes WHERE poll_id = $1 AND user_id = $2")
                .bind(poll.poll_id.to_string())
                .bind(voter.to_string())
                .execute(&mut *tx)
                .await?;
        }
        let inserted = sqlx::query(
            "INSERT INTO poll_votes (poll_id, option_id, user_id, voted_at_unix_ms)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(poll.poll_id.to_string())
        .bind(option_id.to_string())
        .bind(voter.to_string())
        .bind(voted_at_unix_ms)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => return Ok(VoteOutcome::Duplicate),
            Err(error) => return Err(error.into()),
        }
        tx.commit().await?;
        Ok(VoteOutcome::Recorded)
    }

    async fn poll_results(&self, poll: &PollRecord) -> Result<Vec<PollOptionResult>, StoreError> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT v.option_id, u.user_id, u.username
             FROM poll_votes v JOIN users u ON u.user_id = v.user_id
             WHERE v.poll_id = $1 ORDER BY v.voted_at_unix_ms, u.username",
        )
        .bind(poll.poll_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<PollOptionResult> = poll
            .options
            .iter()
            .map(|option| PollOptionResult {
                option_id: option.id,
                option_text: option.text.clone(),
                vote_count: 0,
                voters: Vec::new(),
            })
            .collect();
        for row in &rows {
            let option_id: PollOptionId = parse_id(row, "option_id")?;
            let Some(result) = results.iter_mut().find(|result| result.option_id == option_id)
            else {
                continue;
            };
            result.vote_count += 1;
            result.voters.push(PollVoter {
                id: parse_id(row, "user_id")?,
                username: row.try_get("username")?,
            });
        }
        Ok(results)
    }

    async fn conversation_stats(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationStats, StoreError> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM conversation_members WHERE conversation_id = $1)
                    AS total_members,
                (SELECT COUNT(*) FROM conversation_members cm
                    JOIN users u ON u.user_id = cm.user_id
                    WHERE cm.conversation_id = $1 AND u.status = $2) AS active_members,
                (SELECT COUNT(*) FROM messages WHERE conversation_id = $1) AS total_messages",
        )
        .bind(conversation_id.to_string())
        .bind(UserStatus::ONLINE)
        .fetch_one(&self.pool)
        .await?;
        Ok(ConversationStats {
            total_members: count(&row, "total_members")?,
            active_members: count(&row, "active_members")?,
            total_messages: count(&row, "total_messages")?,
        })
    }
}

async fn insert_message_row<'e, E>(executor: E, message: &MessageRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        "INSERT INTO messages
            (message_id, conversation_id, sender_id, content, message_type, created_at_unix_ms)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(message.message_id.to_string())
    .bind(message.conversation_id.to_string())
    .bind(message.sender_id.to_string())
    .bind(&message.content)
    .bind(message.message_type.as_str())
    .bind(message.created_at)
    .execute(executor)
    .await
    .map_err(|e| {
        if matches!(e, sqlx::Error::Database(_)) {
            StoreError::NotFound
        } else {
            StoreError::from(e)
        }
    })?;
    Ok(())
}

async fn insert_conversation_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    conversation: &ConversationRecord,
    members: &[UserId],
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO conversations
            (conversation_id, kind, name, created_by, created_at_unix_ms)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(conversation.conversation_id.to_string())
    .bind(conversation.kind.as_str())
    .bind(conversation.name.as_deref())
    .bind(conversation.created_by.to_string())
    .bind(conversation.created_at)
    .execute(&mut **tx)
    .await
    .map_err(missing_reference)?;
    let creator = std::iter::once((conversation.created_by, MemberRole::Admin));
    let others = members
        .iter()
        .filter(|member| **member != conversation.created_by)
        .map(|member| (*member, MemberRole::Member));
    for (user_id, role) in creator.chain(others) {
        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role)
             VALUES ($1, $2, $3)
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(conversation.conversation_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .execute(&mut **tx)
        .await
        .map_err(missing_reference)?;
    }
    Ok(())
}

fn conversation_from_row(row: &PgRow) -> Result<ConversationRecord, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(ConversationRecord {
        conversation_id: parse_id(row, "conversation_id")?,
        kind: ConversationKind::parse(&kind).ok_or(StoreError::Corrupt("conversations.kind"))?,
        name: row.try_get("name")?,
        created_by: parse_id(row, "created_by")?,
        created_at: row.try_get("created_at_unix_ms")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(UserRecord {
        id: parse_id(row, "user_id")?,
        username: row.try_get("username")?,
        avatar_url: row.try_get("avatar_url")?,
        status: UserStatus::try_from(status).map_err(|_| StoreError::Corrupt("users.status"))?,
        last_seen: row.try_get("last_seen_unix_ms")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<MessageRecord, StoreError> {
    let message_type: String = row.try_get("message_type")?;
    Ok(MessageRecord {
        message_id: parse_id(row, "message_id")?,
        conversation_id: parse_id(row, "conversation_id")?,
        sender_id: parse_id(row, "sender_id")?,
        content: row.try_get("content")?,
        message_type: MessageKind::parse(&message_type)
            .ok_or(StoreError::Corrupt("messages.message_type"))?,
        created_at: row.try_get("created_at_unix_ms")?,
    })
}

fn parse_id<T>(row: &PgRow, column: &'static str) -> Result<T, StoreError>
where
    T: TryFrom<String>,
{
    let value: String = row.try_get(column)?;
    T::try_from(value).map_err(|_| StoreError::Corrupt(column))
}

fn count(row: &PgRow, column: &'static str) -> Result<u64, StoreError> {
    let value: i64 = row.try_get(column)?;
    u64::try_from(value).map_err(|_| StoreError::Corrupt(column))
}

/// Foreign key violations mean a referenced user or conversation is gone.
fn missing_reference(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some("23503") => {
            StoreError::NotFound
        }
        _ => StoreError::from(error),
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.code().as_deref() == Some("23505"),
        _ => false,
    }
}
