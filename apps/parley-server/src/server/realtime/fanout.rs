use std::sync::Arc;

use parley_core::{ConversationId, UserId};
use parley_protocol::Envelope;

use super::connection_registry::{ConnectionRegistry, DeliveryOutcome};
use crate::server::{
    metrics::{record_fanout_failure, record_gateway_event_serialize_error},
    store::{ChatStore, StoreError, UserRecord},
};

const SCOPE_CONVERSATION: &str = "conversation";

#[derive(Debug, thiserror::Error)]
pub(crate) enum FanoutError {
    #[error("sender profile lookup failed: {0}")]
    SenderResolutionFailed(StoreError),
    #[error("membership resolution failed: {0}")]
    MembershipResolutionFailed(StoreError),
    #[error("envelope could not be encoded")]
    Encode,
}

impl FanoutError {
    pub(crate) const fn reason(&self) -> &'static str {
        match self {
            Self::SenderResolutionFailed(_) => "sender_resolution_failed",
            Self::MembershipResolutionFailed(_) => "membership_resolution_failed",
            Self::Encode => "encode_failed",
        }
    }
}

/// Per-call delivery tally. `recipients` counts users, the rest count
/// connections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FanoutReport {
    pub(crate) recipients: usize,
    pub(crate) delivered: usize,
    pub(crate) stale: usize,
    pub(crate) slow_consumers: usize,
    pub(crate) dropped: usize,
}

impl FanoutReport {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Stale => self.stale += 1,
            DeliveryOutcome::SlowConsumer => self.slow_consumers += 1,
            DeliveryOutcome::Dropped => self.dropped += 1,
        }
    }

    fn merge(&mut self, other: Self) {
        self.recipients += other.recipients;
        self.delivered += other.delivered;
        self.stale += other.stale;
        self.slow_consumers += other.slow_consumers;
        self.dropped += other.dropped;
    }
}

#[derive(Clone)]
pub(crate) struct FanoutDispatcher {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
}

impl FanoutDispatcher {
    pub(crate) fn new(store: Arc<dyn ChatStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Pushes `envelope` to every live connection of every conversation
    /// member except the sender.
    ///
    /// The `sender` field is always replaced with the stored profile of
    /// `envelope.sender_id`. A lookup failure abandons the whole push; the
    /// write that triggered it is unaffected.
    pub(crate) async fn send_to_conversation(
        &self,
        conversation_id: ConversationId,
        envelope: Envelope,
    ) -> Result<FanoutReport, FanoutError> {
        let sender_id = envelope.sender_id;
        let sender = self
            .store
            .find_user_profile(sender_id)
            .await
            .map_err(|e| abandon(conversation_id, FanoutError::SenderResolutionFailed(e)))?;
        let envelope = envelope.with_sender(sender.as_ref().map(UserRecord::sender_profile));

        let members = self
            .store
            .conversation_member_ids(conversation_id)
            .await
            .map_err(|e| abandon(conversation_id, FanoutError::MembershipResolutionFailed(e)))?;

        let event_type = envelope.kind.as_str();
        let Ok(payload) = serde_json::to_string(&envelope) else {
            record_gateway_event_serialize_error(SCOPE_CONVERSATION, event_type);
            return Err(abandon(conversation_id, FanoutError::Encode));
        };

        let mut report = FanoutReport::default();
        for member in members.into_iter().filter(|member| *member != sender_id) {
            report.merge(
                self.send_to_user(member, &payload, event_type, SCOPE_CONVERSATION)
                    .await,
            );
        }
        tracing::debug!(
            event = "fanout.conversation",
            conversation_id = %conversation_id,
            event_type,
            recipients = report.recipients,
            delivered = report.delivered,
            stale = report.stale,
        );
        Ok(report)
    }

    /// Pushes an encoded event to every live connection of one user.
    pub(crate) async fn send_to_user(
        &self,
        user_id: UserId,
        payload: &str,
        event_type: &str,
        scope: &'static str,
    ) -> FanoutReport {
        let mut report = FanoutReport {
            recipients: 1,
            ..FanoutReport::default()
        };
        for connection_id in self.registry.connections_of(user_id).await {
            let outcome = self
                .registry
                .deliver(connection_id, payload, event_type, scope)
                .await;
            if outcome != DeliveryOutcome::Delivered {
                tracing::debug!(
                    event = "fanout.skip",
                    connection_id = %connection_id,
                    user_id = %user_id,
                    outcome = ?outcome,
                );
            }
            report.record(outcome);
        }
        report
    }
}

fn abandon(conversation_id: ConversationId, error: FanoutError) -> FanoutError {
    tracing::error!(
        event = "fanout.abandoned",
        conversation_id = %conversation_id,
        reason = error.reason(),
        error = %error,
    );
    record_fanout_failure(error.reason());
    error
}
