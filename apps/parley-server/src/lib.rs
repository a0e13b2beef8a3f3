#![forbid(unsafe_code)]

mod server;

pub use server::{
    build_router, build_router_with_store, init_tracing, AppConfig, ChatStore, ConversationKind,
    ConversationRecord, ConversationStats, InMemoryChatStore, MemberRole, MembershipOutcome,
    MessageKind, MessageRecord, PgChatStore, PollOptionRecord, PollOptionResult, PollRecord,
    PollVoter, ReceiptOutcome, StoreError, UserRecord, VoteOutcome,
    DEFAULT_GATEWAY_OUTBOUND_QUEUE, DEFAULT_MAX_GATEWAY_EVENT_BYTES,
    DEFAULT_MAX_OUTBOUND_EVENT_BYTES,
};
