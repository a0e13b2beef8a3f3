use std::sync::Arc;

use anyhow::anyhow;
use parley_core::{UserId, UserStatus};
use tokio::sync::mpsc;

use crate::server::{
    auth::now_unix_millis, metrics::record_presence_write_failure, store::ChatStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PresenceTransition {
    Online,
    Offline,
}

impl PresenceTransition {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Online => UserStatus::ONLINE,
            Self::Offline => UserStatus::OFFLINE,
        }
    }

    fn status(self) -> UserStatus {
        match self {
            Self::Online => UserStatus::online(),
            Self::Offline => UserStatus::offline(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PresenceUpdate {
    pub(crate) user_id: UserId,
    pub(crate) transition: PresenceTransition,
    pub(crate) at_unix_ms: i64,
}

/// Persists online/offline transitions off the connection path.
///
/// Updates are applied by a single writer task in submission order, so a
/// user's offline write can never overtake the online write before it.
/// Failures are logged and counted, never returned.
#[derive(Clone)]
pub(crate) struct PresenceTracker {
    updates: mpsc::UnboundedSender<PresenceUpdate>,
}

impl PresenceTracker {
    pub(crate) fn spawn(store: Arc<dyn ChatStore>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("presence writer requires a tokio runtime: {e}"))?;
        let (updates, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_presence_writer(store, rx));
        Ok(Self { updates })
    }

    pub(crate) fn on_first_connection(&self, user_id: UserId) {
        self.enqueue(user_id, PresenceTransition::Online);
    }

    pub(crate) fn on_last_disconnection(&self, user_id: UserId) {
        self.enqueue(user_id, PresenceTransition::Offline);
    }

    fn enqueue(&self, user_id: UserId, transition: PresenceTransition) {
        let update = PresenceUpdate {
            user_id,
            transition,
            at_unix_ms: now_unix_millis(),
        };
        if self.updates.send(update).is_err() {
            tracing::warn!(
                event = "presence.enqueue",
                user_id = %user_id,
                transition = transition.as_str(),
                "presence writer is not running"
            );
            record_presence_write_failure(transition.as_str());
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<PresenceUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (Self { updates }, rx)
    }
}

async fn run_presence_writer(
    store: Arc<dyn ChatStore>,
    mut updates: mpsc::UnboundedReceiver<PresenceUpdate>,
) {
    while let Some(update) = updates.recv().await {
        apply_presence_update(store.as_ref(), update).await;
    }
}

pub(crate) async fn apply_presence_update(store: &dyn ChatStore, update: PresenceUpdate) -> bool {
    let transition = update.transition.as_str();
    match store
        .update_user_status(update.user_id, &update.transition.status(), update.at_unix_ms)
        .await
    {
        Ok(()) => {
            tracing::debug!(event = "presence.write", user_id = %update.user_id, transition);
            true
        }
        Err(error) => {
            tracing::warn!(
                event = "presence.write",
                user_id = %update.user_id,
                transition,
                error = %error,
                "presence write failed"
            );
            record_presence_write_failure(transition);
            false
        }
    }
}
