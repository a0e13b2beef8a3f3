use parley_core::MessageContent;
use serde_json::json;

use crate::server::{
    chat::send_text_message,
    realtime::ingress::handle_client_payload,
    store::{ChatStore, InMemoryChatStore},
    tests::support::{attach, drain_events, seed_conversation, seed_expired_poll, state_with},
};

fn frame(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("frame should encode")
}

#[tokio::test]
async fn malformed_frame_does_not_end_the_session() {
    let store = InMemoryChatStore::new();
    let (conversation_id, users) = seed_conversation(&store, &["alice", "bob"]).await;
    let (alice, bob) = (users[0], users[1]);
    let state = state_with(&store);
    let alice_device = attach(&state, alice).await;
    let mut bob_device = attach(&state, bob).await;

    let notice = handle_client_payload(&state, alice_device.connection_id, alice, b"not json")
        .await
        .expect("garbage should be answered");
    assert_eq!(notice.message, "invalid_json");

    let follow_up = handle_client_payload(
        &state,
        alice_device.connection_id,
        alice,
        &frame(&json!({
            "type": "text",
            "conversation_id": conversation_id.to_string(),
            "data": {"content": "sorry, that was my cat"}
        })),
    )
    .await;

    assert!(follow_up.is_none());
    let delivered = drain_events(&mut bob_device.outbound);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["data"]["content"], "sorry, that was my cat");
}

#[tokio::test]
async fn unknown_type_is_ignored_without_side_effects() {
    let store = InMemoryChatStore::new();
    let (conversation_id, users) = seed_conversation(&store, &["alice", "bob"]).await;
    let (alice, bob) = (users[0], users[1]);
    let state = state_with(&store);
    let mut alice_device = attach(&state, alice).await;
    let mut bob_device = attach(&state, bob).await;

    let notice = handle_client_payload(
        &state,
        alice_device.connection_id,
        alice,
        &frame(&json!({
            "type": "typing",
            "conversation_id": conversation_id.to_string(),
            "data": {}
        })),
    )
    .await;

    assert!(notice.is_none());
    assert!(drain_events(&mut alice_device.outbound).is_empty());
    assert!(drain_events(&mut bob_device.outbound).is_empty());
    let stats = store
        .conversation_stats(conversation_id)
        .await
        .expect("stats should load");
    assert_eq!(stats.total_messages, 0);
}

#[tokio::test]
async fn vote_on_expired_poll_is_refused_before_any_write() {
    let store = InMemoryChatStore::new();
    let (conversation_id, users) = seed_conversation(&store, &["alice", "bob"]).await;
    let (alice, bob) = (users[0], users[1]);
    let poll = seed_expired_poll(&store, conversation_id, alice).await;
    let state = state_with(&store);
    let mut alice_device = attach(&state, alice).await;
    let bob_device = attach(&state, bob).await;

    let notice = handle_client_payload(
        &state,
        bob_device.connection_id,
        bob,
        &frame(&json!({
            "type": "poll",
            "data": {
                "poll_id": poll.poll_id.to_string(),
                "option_id": poll.options[0].id.to_string()
            }
        })),
    )
    .await
    .expect("expired vote should be answered");

    assert_eq!(notice.message, "poll_expired");
    assert!(drain_events(&mut alice_device.outbound).is_empty());
    let results = store
        .poll_results(&poll)
        .await
        .expect("results should load");
    assert!(results.iter().all(|option| option.vote_count == 0));
}

#[tokio::test]
async fn read_receipt_reaches_the_author() {
    let store = InMemoryChatStore::new();
    let (conversation_id, users) = seed_conversation(&store, &["alice", "bob"]).await;
    let (alice, bob) = (users[0], users[1]);
    let state = state_with(&store);
    let mut alice_device = attach(&state, alice).await;
    let bob_device = attach(&state, bob).await;

    let message = send_text_message(
        &state,
        alice,
        conversation_id,
        MessageContent::try_from(String::from("did you see this?"))
            .expect("content should be valid"),
    )
    .await
    .expect("message should be stored");
    let message_id = message.message_id;

    let receipt = frame(&json!({
        "type": "read_receipt",
        "data": {"message_id": message_id.to_string()}
    }));
    assert!(handle_client_payload(&state, bob_device.connection_id, bob, &receipt)
        .await
        .is_none());
    assert!(handle_client_payload(&state, bob_device.connection_id, bob, &receipt)
        .await
        .is_none());

    let delivered = drain_events(&mut alice_device.outbound);
    assert_eq!(delivered.len(), 2);
    for event in &delivered {
        assert_eq!(event["type"], "read_receipt");
        assert_eq!(event["data"]["user_id"], bob.to_string());
        assert_eq!(event["data"]["message_id"], message_id.to_string());
    }
}
