use parley_core::UserId;
use uuid::Uuid;

use super::connection_registry::{ConnectionHandle, Deregistration, Registration};
use crate::server::{
    auth::{Identity, TokenError},
    core::{AppState, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION},
    metrics::record_auth_failure,
};

/// Why an upgraded socket is closed before registration.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AdmissionRejection {
    InvalidToken(TokenError),
    UnknownSubject,
    SetupFailed,
}

impl AdmissionRejection {
    pub(crate) const fn close_code(&self) -> u16 {
        match self {
            Self::InvalidToken(_) | Self::UnknownSubject => CLOSE_POLICY_VIOLATION,
            Self::SetupFailed => CLOSE_INTERNAL_ERROR,
        }
    }

    pub(crate) const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid_token",
            Self::UnknownSubject => "unknown_user",
            Self::SetupFailed => "setup_failed",
        }
    }
}

/// Verifies the token and confirms its subject is a known user. Touches no
/// connection state.
pub(crate) async fn screen_admission(
    state: &AppState,
    token: &str,
) -> Result<Identity, AdmissionRejection> {
    let identity = state.tokens.verify(token).map_err(|error| {
        record_auth_failure(error.reason());
        tracing::info!(event = "gateway.admission", reason = error.reason(), "token rejected");
        AdmissionRejection::InvalidToken(error)
    })?;

    match state.store.find_user_profile(identity.user_id).await {
        Ok(Some(_)) => Ok(identity),
        Ok(None) => {
            record_auth_failure("unknown_user");
            tracing::info!(
                event = "gateway.admission",
                user_id = %identity.user_id,
                reason = "unknown_user",
                "token subject has no profile"
            );
            Err(AdmissionRejection::UnknownSubject)
        }
        Err(error) => {
            tracing::error!(
                event = "gateway.admission",
                user_id = %identity.user_id,
                error = %error,
                "subject lookup failed"
            );
            Err(AdmissionRejection::SetupFailed)
        }
    }
}

/// Registers an admitted connection and marks the user online on their first
/// concurrent connection.
pub(crate) async fn admit(
    state: &AppState,
    user_id: UserId,
    handle: ConnectionHandle,
) -> Registration {
    state
        .registry
        .register_notifying(user_id, handle, |user_id| {
            state.presence.on_first_connection(user_id);
        })
        .await
}

/// Removes a connection and marks the user offline when it was their last.
/// Safe to call more than once.
pub(crate) async fn release(state: &AppState, connection_id: Uuid) -> Option<Deregistration> {
    state
        .registry
        .deregister_notifying(connection_id, |user_id| {
            state.presence.on_last_disconnection(user_id);
        })
        .await
}
