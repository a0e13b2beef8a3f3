use std::time::Duration;

use crate::server::{
    core::AppState,
    realtime::{
        admission::release,
        presence::{PresenceTracker, PresenceTransition},
    },
    store::{ChatStore, InMemoryChatStore},
    tests::support::{attach, seed_conversation, state_with, wait_for_status},
};

#[tokio::test]
async fn second_device_keeps_user_online_until_both_disconnect() {
    let store = InMemoryChatStore::new();
    let (_, users) = seed_conversation(&store, &["alice"]).await;
    let alice = users[0];
    let state = state_with(&store);

    let phone = attach(&state, alice).await;
    let laptop = attach(&state, alice).await;
    wait_for_status(&store, alice, "online").await;

    let removed = release(&state, phone.connection_id)
        .await
        .expect("phone should be registered");
    assert!(!removed.was_last_connection);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let profile = store
        .find_user_profile(alice)
        .await
        .expect("lookup should succeed")
        .expect("alice should exist");
    assert!(profile.status.is_online());

    let removed = release(&state, laptop.connection_id)
        .await
        .expect("laptop should be registered");
    assert!(removed.was_last_connection);
    wait_for_status(&store, alice, "offline").await;
}

#[tokio::test]
async fn transitions_alternate_under_concurrent_device_churn() {
    let store = InMemoryChatStore::new();
    let (_, users) = seed_conversation(&store, &["alice"]).await;
    let alice = users[0];
    let (presence, mut updates) = PresenceTracker::detached();
    let state = AppState {
        presence,
        ..state_with(&store)
    };

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            let device = attach(&state, alice).await;
            tokio::task::yield_now().await;
            release(&state, device.connection_id).await
        }));
    }
    for task in tasks {
        task.await
            .expect("churn task should finish")
            .expect("device should deregister once");
    }
    drop(state);

    let mut transitions = Vec::new();
    while let Some(update) = updates.recv().await {
        assert_eq!(update.user_id, alice);
        transitions.push(update.transition);
    }

    assert!(!transitions.is_empty());
    for (index, transition) in transitions.iter().enumerate() {
        let expected = if index % 2 == 0 {
            PresenceTransition::Online
        } else {
            PresenceTransition::Offline
        };
        assert_eq!(*transition, expected, "transition {index} out of order");
    }
    assert_eq!(transitions.last(), Some(&PresenceTransition::Offline));
}

#[tokio::test]
async fn presence_failure_does_not_block_teardown() {
    let store = InMemoryChatStore::new();
    let state = state_with(&store);
    let ghost = parley_core::UserId::new();

    let device = attach(&state, ghost).await;
    let removed = release(&state, device.connection_id)
        .await
        .expect("connection should deregister despite failed presence writes");

    assert!(removed.was_last_connection);
    assert!(state.registry.connections_of(ghost).await.is_empty());
}
