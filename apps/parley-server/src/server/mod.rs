pub(crate) mod auth;
pub(crate) mod chat;
pub(crate) mod core;
pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod metrics;
pub(crate) mod realtime;
pub(crate) mod router;
pub(crate) mod store;
pub(crate) mod types;

pub use core::{
    AppConfig, DEFAULT_GATEWAY_OUTBOUND_QUEUE, DEFAULT_MAX_GATEWAY_EVENT_BYTES,
    DEFAULT_MAX_OUTBOUND_EVENT_BYTES,
};
pub use errors::init_tracing;
pub use router::{build_router, build_router_with_store};
pub use store::{
    ChatStore, ConversationKind, ConversationRecord, ConversationStats, InMemoryChatStore,
    MemberRole, MembershipOutcome, MessageKind, MessageRecord, PgChatStore, PollOptionRecord,
    PollOptionResult, PollRecord, PollVoter, ReceiptOutcome, StoreError, UserRecord, VoteOutcome,
};
