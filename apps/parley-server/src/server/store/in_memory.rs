use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use parley_core::{ConversationId, MessageId, PollId, PollOptionId, UserId, UserStatus};
use tokio::sync::RwLock;

use super::{
    ChatStore, ConversationKind, ConversationRecord, ConversationStats, MemberRole,
    MembershipOutcome, MessageRecord, PollOptionResult, PollRecord, PollVoter, ReceiptOutcome,
    StoreError, UserRecord, VoteOutcome,
};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, UserRecord>,
    conversations: HashMap<ConversationId, ConversationRow>,
    messages: HashMap<MessageId, MessageRecord>,
    // insertion order
    message_log: Vec<MessageId>,
    read_receipts: HashMap<(MessageId, UserId), i64>,
    polls: HashMap<PollId, PollRecord>,
    poll_votes: HashMap<PollId, Vec<VoteRow>>,
}

struct ConversationRow {
    record: ConversationRecord,
    members: BTreeMap<UserId, MemberRow>,
}

impl ConversationRow {
    fn new(record: ConversationRecord, members: &[UserId]) -> Self {
        let creator = record.created_by;
        let mut row = Self {
            record,
            members: BTreeMap::new(),
        };
        row.join(creator, MemberRole::Admin);
        for member in members {
            row.join(*member, MemberRole::Member);
        }
        row
    }

    fn join(&mut self, user_id: UserId, role: MemberRole) -> MembershipOutcome {
        if self.members.contains_key(&user_id) {
            return MembershipOutcome::AlreadyMember;
        }
        self.members.insert(
            user_id,
            MemberRow {
                role,
                last_read: None,
            },
        );
        MembershipOutcome::Added
    }

    fn is_personal_between(&self, a: UserId, b: UserId) -> bool {
        self.record.kind == ConversationKind::Personal
            && self.members.contains_key(&a)
            && self.members.contains_key(&b)
    }
}

struct MemberRow {
    role: MemberRole,
    last_read: Option<MessageId>,
}

struct VoteRow {
    option_id: PollOptionId,
    user_id: UserId,
}

/// Process-local [`ChatStore`] used when no database is configured.
#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryChatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.tables.write().await.users.insert(user.id, user);
    }

    /// Creates (or replaces) an unnamed group. The first member is its
    /// admin.
    pub async fn insert_conversation(&self, conversation_id: ConversationId, members: &[UserId]) {
        let Some((creator, rest)) = members.split_first() else {
            return;
        };
        let record = ConversationRecord {
            conversation_id,
            kind: ConversationKind::Group,
            name: None,
            created_by: *creator,
            created_at: 0,
        };
        self.tables
            .write()
            .await
            .conversations
            .insert(conversation_id, ConversationRow::new(record, rest));
    }

    pub async fn last_read_message_id(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Option<MessageId> {
        self.tables
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .and_then(|row| row.members.get(&user_id))
            .and_then(|member| member.last_read)
    }
}

impl Tables {
    fn require_users(&self, users: impl IntoIterator<Item = UserId>) -> Result<(), StoreError> {
        for user_id in users {
            if !self.users.contains_key(&user_id) {
                return Err(StoreError::NotFound);
            }
        }
        Ok(())
    }

    fn insert_message(&mut self, message: &MessageRecord) -> Result<(), StoreError> {
        if !self.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::NotFound);
        }
        self.messages.insert(message.message_id, message.clone());
        self.message_log.push(message.message_id);
        Ok(())
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn find_user_profile(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn update_user_status(
        &self,
        user_id: UserId,
        status: &UserStatus,
        at_unix_ms: i64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.status = status.clone();
        user.last_seen = Some(at_unix_ms);
        Ok(())
    }

    async fn create_conversation(
        &self,
        conversation: &ConversationRecord,
        members: &[UserId],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.require_users(
            std::iter::once(conversation.created_by).chain(members.iter().copied()),
        )?;
        tables.conversations.insert(
            conversation.conversation_id,
            ConversationRow::new(conversation.clone(), members),
        );
        Ok(())
    }

    async fn find_or_create_personal_conversation(
        &self,
        candidate: &ConversationRecord,
        other: UserId,
    ) -> Result<ConversationRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let creator = candidate.created_by;
        if let Some(existing) = tables
            .conversations
            .values()
            .find(|row| row.is_personal_between(creator, other))
        {
            return Ok(existing.record.clone());
        }
        tables.require_users([creator, other])?;
        tables.conversations.insert(
            candidate.conversation_id,
            ConversationRow::new(candidate.clone(), &[other]),
        );
        Ok(candidate.clone())
    }

    async fn find_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .map(|row| row.record.clone()))
    }

    async fn user_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut conversations: Vec<ConversationRecord> = tables
            .conversations
            .values()
            .filter(|row| row.members.contains_key(&user_id))
            .map(|row| row.record.clone())
            .collect();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }

    async fn member_role(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<MemberRole>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .and_then(|row| row.members.get(&user_id))
            .map(|member| member.role))
    }

    async fn add_conversation_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        role: MemberRole,
    ) -> Result<MembershipOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        tables.require_users([user_id])?;
        let row = tables
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::NotFound)?;
        Ok(row.join(user_id, role))
    }

    async fn conversation_member_ids(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .map(|row| row.members.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn is_conversation_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .is_some_and(|row| row.members.contains_key(&user_id)))
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.tables.write().await.insert_message(message)
    }

    async fn find_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        Ok(self.tables.read().await.messages.get(&message_id).cloned())
    }

    async fn conversation_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let tables = self.tables.read().await;
        let end = match before {
            None => tables.message_log.len(),
            Some(before) => tables
                .message_log
                .iter()
                .position(|id| *id == before)
                .filter(|_| {
                    tables
                        .messages
                        .get(&before)
                        .is_some_and(|message| message.conversation_id == conversation_id)
                })
                .ok_or(StoreError::NotFound)?,
        };
        Ok(tables.message_log[..end]
            .iter()
            .rev()
            .filter_map(|id| tables.messages.get(id))
            .filter(|message| message.conversation_id == conversation_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn record_read_receipt(
        &self,
        message: &MessageRecord,
        reader: UserId,
        read_at_unix_ms: i64,
    ) -> Result<ReceiptOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        let key = (message.message_id, reader);
        if tables.read_receipts.contains_key(&key) {
            return Ok(ReceiptOutcome::Duplicate);
        }
        tables.read_receipts.insert(key, read_at_unix_ms);
        if let Some(member) = tables
            .conversations
            .get_mut(&message.conversation_id)
            .and_then(|row| row.members.get_mut(&reader))
        {
            member.last_read = Some(message.message_id);
        }
        Ok(ReceiptOutcome::Recorded)
    }

    async fn create_poll(
        &self,
        message: &MessageRecord,
        poll: &PollRecord,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.insert_message(message)?;
        tables.polls.insert(poll.poll_id, poll.clone());
        Ok(())
    }

    async fn find_poll(&self, poll_id: PollId) -> Result<Option<PollRecord>, StoreError> {
        Ok(self.tables.read().await.polls.get(&poll_id).cloned())
    }

    async fn record_poll_vote(
        &self,
        poll: &PollRecord,
        option_id: PollOptionId,
        voter: UserId,
        _voted_at_unix_ms: i64,
    ) -> Result<VoteOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        let votes = tables.poll_votes.entry(poll.poll_id).or_default();
        if votes
            .iter()
            .any(|vote| vote.user_id == voter && vote.option_id == option_id)
        {
            return Ok(VoteOutcome::Duplicate);
        }
        if poll.vote_mode().replaces_previous_vote() {
            votes.retain(|vote| vote.user_id != voter);
        }
        votes.push(VoteRow {
            option_id,
            user_id: voter,
        });
        Ok(VoteOutcome::Recorded)
    }

    async fn poll_results(&self, poll: &PollRecord) -> Result<Vec<PollOptionResult>, StoreError> {
        let tables = self.tables.read().await;
        let votes = tables
            .poll_votes
            .get(&poll.poll_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(poll
            .options
            .iter()
            .map(|option| {
                let voters: Vec<PollVoter> = votes
                    .iter()
                    .filter(|vote| vote.option_id == option.id)
                    .filter_map(|vote| tables.users.get(&vote.user_id))
                    .map(|user| PollVoter {
                        id: user.id,
                        username: user.username.clone(),
                    })
                    .collect();
                PollOptionResult {
                    option_id: option.id,
                    option_text: option.text.clone(),
                    vote_count: voters.len() as u64,
                    voters,
                }
            })
            .collect())
    }

    async fn conversation_stats(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationStats, StoreError> {
        let tables = self.tables.read().await;
        let members: HashSet<UserId> = tables
            .conversations
            .get(&conversation_id)
            .map(|row| row.members.keys().copied().collect())
            .unwrap_or_default();
        let active_members = members
            .iter()
            .filter_map(|member| tables.users.get(member))
            .filter(|user| user.status.is_online())
            .count();
        let total_messages = tables
            .messages
            .values()
            .filter(|message| message.conversation_id == conversation_id)
            .count();
        Ok(ConversationStats {
            total_members: members.len() as u64,
            active_members: active_members as u64,
            total_messages: total_messages as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_core::{ConversationId, MessageId, PollId, PollOptionId, UserId, UserStatus};

    use super::InMemoryChatStore;
    use crate::server::store::{
        ChatStore, ConversationKind, ConversationRecord, MemberRole, MembershipOutcome,
        MessageKind, MessageRecord, PollOptionRecord, PollRecord, ReceiptOutcome, StoreError,
        UserRecord, VoteOutcome,
    };

    fn conversation(
        kind: ConversationKind,
        created_by: UserId,
        created_at: i64,
    ) -> ConversationRecord {
        ConversationRecord {
            conversation_id: ConversationId::new(),
            kind,
            name: (kind == ConversationKind::Group).then(|| String::from("crew")),
            created_by,
            created_at,
        }
    }

    fn message(conversation_id: ConversationId, sender_id: UserId) -> MessageRecord {
        MessageRecord {
            message_id: MessageId::new(),
            conversation_id,
            sender_id,
            content: String::from("hello"),
            message_type: MessageKind::Text,
            created_at: 1,
        }
    }

    fn poll(conversation_id: ConversationId, creator: UserId, multiple: bool) -> PollRecord {
        PollRecord {
            poll_id: PollId::new(),
            message_id: MessageId::new(),
            conversation_id,
            question: String::from("Where?"),
            is_multiple_choice: multiple,
            expires_at: None,
            created_by: creator,
            created_at: 1,
            options: vec![
                PollOptionRecord {
                    id: PollOptionId::new(),
                    text: String::from("here"),
                },
                PollOptionRecord {
                    id: PollOptionId::new(),
                    text: String::from("there"),
                },
            ],
        }
    }

    async fn seeded() -> (InMemoryChatStore, ConversationId, UserId, UserId) {
        let store = InMemoryChatStore::new();
        let alice = UserId::new();
        let bob = UserId::new();
        store.insert_user(UserRecord::new(alice, "alice")).await;
        store.insert_user(UserRecord::new(bob, "bob")).await;
        let conversation_id = ConversationId::new();
        store.insert_conversation(conversation_id, &[alice, bob]).await;
        (store, conversation_id, alice, bob)
    }

    #[tokio::test]
    async fn status_updates_require_known_user() {
        let (store, _, alice, _) = seeded().await;
        store
            .update_user_status(alice, &UserStatus::online(), 42)
            .await
            .expect("known user status should update");
        let record = store
            .find_user_profile(alice)
            .await
            .expect("lookup should succeed")
            .expect("user should exist");
        assert!(record.status.is_online());
        assert_eq!(record.last_seen, Some(42));

        let missing = store
            .update_user_status(UserId::new(), &UserStatus::offline(), 43)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn read_receipts_are_idempotent_and_advance_marker() {
        let (store, conversation_id, alice, bob) = seeded().await;
        let sent = message(conversation_id, alice);
        store.insert_message(&sent).await.expect("message should insert");

        let first = store.record_read_receipt(&sent, bob, 5).await.expect("receipt");
        let second = store.record_read_receipt(&sent, bob, 6).await.expect("receipt");

        assert_eq!(first, ReceiptOutcome::Recorded);
        assert_eq!(second, ReceiptOutcome::Duplicate);
        assert_eq!(
            store.last_read_message_id(conversation_id, bob).await,
            Some(sent.message_id)
        );
    }

    #[tokio::test]
    async fn single_choice_vote_replaces_previous_selection() {
        let (store, conversation_id, alice, bob) = seeded().await;
        let poll = poll(conversation_id, alice, false);
        store
            .create_poll(&message(conversation_id, alice), &poll)
            .await
            .expect("poll should persist");
        let first = poll.options[0].id;
        let second = poll.options[1].id;

        assert_eq!(
            store.record_poll_vote(&poll, first, bob, 1).await.expect("vote"),
            VoteOutcome::Recorded
        );
        assert_eq!(
            store.record_poll_vote(&poll, first, bob, 2).await.expect("vote"),
            VoteOutcome::Duplicate
        );
        assert_eq!(
            store.record_poll_vote(&poll, second, bob, 3).await.expect("vote"),
            VoteOutcome::Recorded
        );

        let results = store.poll_results(&poll).await.expect("results");
        assert_eq!(results[0].vote_count, 0);
        assert_eq!(results[1].vote_count, 1);
        assert_eq!(results[1].voters[0].username, "bob");
    }

    #[tokio::test]
    async fn multiple_choice_votes_accumulate() {
        let (store, conversation_id, alice, bob) = seeded().await;
        let poll = poll(conversation_id, alice, true);
        store
            .create_poll(&message(conversation_id, alice), &poll)
            .await
            .expect("poll should persist");

        for option in &poll.options {
            store
                .record_poll_vote(&poll, option.id, bob, 1)
                .await
                .expect("vote should record");
        }
        store
            .record_poll_vote(&poll, poll.options[0].id, alice, 1)
            .await
            .expect("vote should record");

        let counts: Vec<u64> = store
            .poll_results(&poll)
            .await
            .expect("results")
            .iter()
            .map(|result| result.vote_count)
            .collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[tokio::test]
    async fn stats_count_online_members_and_messages() {
        let (store, conversation_id, alice, bob) = seeded().await;
        store
            .insert_message(&message(conversation_id, alice))
            .await
            .expect("message should insert");
        store
            .update_user_status(bob, &UserStatus::online(), 1)
            .await
            .expect("status should update");

        let stats = store
            .conversation_stats(conversation_id)
            .await
            .expect("stats should load");
        assert_eq!(stats.total_members, 2);
        assert_eq!(stats.active_members, 1);
        assert_eq!(stats.total_messages, 1);
    }

    #[tokio::test]
    async fn messages_require_existing_conversation() {
        let store = InMemoryChatStore::new();
        let result = store.insert_message(&message(ConversationId::new(), UserId::new())).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn group_creator_is_admin_and_others_are_members() {
        let (store, _, alice, bob) = seeded().await;
        let group = conversation(ConversationKind::Group, alice, 10);

        store
            .create_conversation(&group, &[bob, alice])
            .await
            .expect("group should be created");

        let id = group.conversation_id;
        assert_eq!(
            store.member_role(id, alice).await.expect("role lookup"),
            Some(MemberRole::Admin)
        );
        assert_eq!(
            store.member_role(id, bob).await.expect("role lookup"),
            Some(MemberRole::Member)
        );
        assert_eq!(
            store.conversation_member_ids(id).await.expect("members").len(),
            2
        );
        assert_eq!(
            store.find_conversation(id).await.expect("lookup"),
            Some(group)
        );
    }

    #[tokio::test]
    async fn conversation_with_unknown_member_is_refused() {
        let (store, _, alice, _) = seeded().await;
        let group = conversation(ConversationKind::Group, alice, 10);

        let result = store.create_conversation(&group, &[UserId::new()]).await;

        assert!(matches!(result, Err(StoreError::NotFound)));
        assert_eq!(
            store
                .find_conversation(group.conversation_id)
                .await
                .expect("lookup"),
            None
        );
    }

    #[tokio::test]
    async fn personal_conversation_is_reused_from_either_side() {
        let (store, _, alice, bob) = seeded().await;
        let first = store
            .find_or_create_personal_conversation(
                &conversation(ConversationKind::Personal, alice, 10),
                bob,
            )
            .await
            .expect("personal chat should be created");
        let again = store
            .find_or_create_personal_conversation(
                &conversation(ConversationKind::Personal, bob, 20),
                alice,
            )
            .await
            .expect("personal chat should be found");

        assert_eq!(again, first);
        let listed = store.user_conversations(bob).await.expect("list");
        assert_eq!(
            listed
                .iter()
                .filter(|c| c.kind == ConversationKind::Personal)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn user_conversations_are_newest_first() {
        let (store, seeded_id, alice, bob) = seeded().await;
        let older = conversation(ConversationKind::Group, alice, 10);
        let newer = conversation(ConversationKind::Group, bob, 20);
        store.create_conversation(&older, &[]).await.expect("create");
        store.create_conversation(&newer, &[alice]).await.expect("create");

        let ids: Vec<ConversationId> = store
            .user_conversations(alice)
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();

        assert_eq!(ids, vec![newer.conversation_id, older.conversation_id, seeded_id]);
    }

    #[tokio::test]
    async fn adding_a_member_twice_is_reported() {
        let (store, _, alice, bob) = seeded().await;
        let group = conversation(ConversationKind::Group, alice, 10);
        store.create_conversation(&group, &[]).await.expect("create");
        let id = group.conversation_id;

        let first = store
            .add_conversation_member(id, bob, MemberRole::Member)
            .await
            .expect("add should succeed");
        let second = store
            .add_conversation_member(id, bob, MemberRole::Admin)
            .await
            .expect("repeat add should succeed");

        assert_eq!(first, MembershipOutcome::Added);
        assert_eq!(second, MembershipOutcome::AlreadyMember);
        assert_eq!(
            store.member_role(id, bob).await.expect("role lookup"),
            Some(MemberRole::Member)
        );
        let missing = store
            .add_conversation_member(ConversationId::new(), bob, MemberRole::Member)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn history_pages_backwards_from_a_cursor() {
        let (store, conversation_id, alice, bob) = seeded().await;
        let other = ConversationId::new();
        store.insert_conversation(other, &[alice]).await;
        let mut sent = Vec::new();
        for _ in 0..4 {
            let record = message(conversation_id, alice);
            store.insert_message(&record).await.expect("insert");
            store
                .insert_message(&message(other, alice))
                .await
                .expect("insert");
            sent.push(record.message_id);
        }

        let latest: Vec<MessageId> = store
            .conversation_messages(conversation_id, 2, None)
            .await
            .expect("history")
            .into_iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(latest, vec![sent[3], sent[2]]);

        let older: Vec<MessageId> = store
            .conversation_messages(conversation_id, 10, Some(sent[2]))
            .await
            .expect("history")
            .into_iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(older, vec![sent[1], sent[0]]);

        let foreign = message(other, bob);
        store.insert_message(&foreign).await.expect("insert");
        let result = store
            .conversation_messages(conversation_id, 10, Some(foreign.message_id))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }
}
