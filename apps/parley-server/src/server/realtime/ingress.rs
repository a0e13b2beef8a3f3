use parley_core::UserId;
use parley_protocol::{parse_client_event, ClientEvent, ErrorNotice, ProtocolError};
use uuid::Uuid;

use crate::server::{
    chat::{cast_poll_vote, mark_message_read, send_text_message, update_status},
    core::AppState,
    errors::ChatFailure,
    metrics::{record_gateway_event_parse_rejected, record_gateway_event_unknown_received},
};

const SCOPE: &str = "ingress";

/// Decodes and dispatches one inbound frame.
///
/// Returns the notice to send back on the same connection, if any. Unknown
/// event types are dropped without a notice.
pub(crate) async fn handle_client_payload(
    state: &AppState,
    connection_id: Uuid,
    user_id: UserId,
    payload: &[u8],
) -> Option<ErrorNotice> {
    let event = match parse_client_event(payload) {
        Ok(event) => event,
        Err(ProtocolError::UnknownEventType(event_type)) => {
            tracing::warn!(
                event = "gateway.ingress",
                connection_id = %connection_id,
                user_id = %user_id,
                event_type = %event_type,
                "dropping unknown event type"
            );
            record_gateway_event_unknown_received(SCOPE, &event_type);
            return None;
        }
        Err(error) => {
            tracing::debug!(
                event = "gateway.ingress",
                connection_id = %connection_id,
                reason = error.reason(),
                error = %error,
            );
            record_gateway_event_parse_rejected(SCOPE, error.reason());
            return Some(ErrorNotice::new(error.reason()));
        }
    };

    let event_type = event.event_type();
    match route_client_event(state, user_id, event).await {
        Ok(()) => None,
        Err(failure) => {
            tracing::debug!(
                event = "gateway.ingress",
                connection_id = %connection_id,
                event_type,
                reason = failure.code(),
                "event rejected"
            );
            Some(ErrorNotice::new(failure.code()))
        }
    }
}

pub(crate) async fn route_client_event(
    state: &AppState,
    user_id: UserId,
    event: ClientEvent,
) -> Result<(), ChatFailure> {
    match event {
        ClientEvent::Text(text) => {
            send_text_message(state, user_id, text.conversation_id, text.content).await?;
        }
        ClientEvent::ReadReceipt(receipt) => {
            mark_message_read(state, user_id, receipt.message_id).await?;
        }
        ClientEvent::UserStatus(status) => {
            update_status(state, user_id, &status.status).await?;
        }
        ClientEvent::PollVote(vote) => {
            cast_poll_vote(state, user_id, vote.poll_id, vote.option_id).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use parley_core::{ConversationId, UserId};
    use serde_json::json;
    use uuid::Uuid;

    use super::handle_client_payload;
    use crate::server::{
        store::{ChatStore, InMemoryChatStore},
        tests::support::{seed_conversation, state_with},
    };

    fn frame(value: &serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(value).expect("frame should encode")
    }

    #[tokio::test]
    async fn malformed_json_yields_error_notice() {
        let store = InMemoryChatStore::new();
        let state = state_with(&store);

        let notice = handle_client_payload(&state, Uuid::new_v4(), UserId::new(), b"{nope")
            .await
            .expect("malformed json should produce a notice");

        assert_eq!(notice.message, "invalid_json");
    }

    #[tokio::test]
    async fn unknown_event_type_is_dropped_silently() {
        let store = InMemoryChatStore::new();
        let state = state_with(&store);

        let notice = handle_client_payload(
            &state,
            Uuid::new_v4(),
            UserId::new(),
            &frame(&json!({"type": "typing", "data": {}})),
        )
        .await;

        assert!(notice.is_none());
    }

    #[tokio::test]
    async fn text_without_content_is_rejected() {
        let store = InMemoryChatStore::new();
        let state = state_with(&store);

        let notice = handle_client_payload(
            &state,
            Uuid::new_v4(),
            UserId::new(),
            &frame(&json!({
                "type": "text",
                "conversation_id": ConversationId::new(),
                "data": {"content": "   "}
            })),
        )
        .await
        .expect("blank content should produce a notice");

        assert_eq!(notice.message, "invalid_text_payload");
    }

    #[tokio::test]
    async fn failed_precondition_reports_failure_code() {
        let store = InMemoryChatStore::new();
        let (conversation_id, _) = seed_conversation(&store, &["alice"]).await;
        let state = state_with(&store);

        let notice = handle_client_payload(
            &state,
            Uuid::new_v4(),
            UserId::new(),
            &frame(&json!({
                "type": "text",
                "conversation_id": conversation_id,
                "data": {"content": "let me in"}
            })),
        )
        .await
        .expect("outsider should get a notice");

        assert_eq!(notice.message, "forbidden");
    }

    #[tokio::test]
    async fn status_update_is_persisted_without_notice() {
        let store = InMemoryChatStore::new();
        let (_, users) = seed_conversation(&store, &["alice"]).await;
        let state = state_with(&store);

        let notice = handle_client_payload(
            &state,
            Uuid::new_v4(),
            users[0],
            &frame(&json!({"type": "user_status", "data": {"status": "away"}})),
        )
        .await;

        assert!(notice.is_none());
        let user = store
            .find_user_profile(users[0])
            .await
            .expect("lookup should succeed")
            .expect("user should exist");
        assert_eq!(user.status.as_str(), "away");
    }
}
