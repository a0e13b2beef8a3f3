use axum::{http::StatusCode, response::IntoResponse, Json};
use parley_core::DomainError;

use super::{metrics::record_auth_failure, store::StoreError, types::ErrorBody};

/// Failure of a chat operation, surfaced to the initiating client either as
/// an HTTP response or as a gateway `error` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChatFailure {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    PollExpired,
    Internal,
}

impl ChatFailure {
    pub(crate) const fn code(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::PollExpired => "poll_expired",
            Self::Internal => "internal_error",
        }
    }

    const fn status(self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PollExpired => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ChatFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl From<DomainError> for ChatFailure {
    fn from(_: DomainError) -> Self {
        Self::InvalidRequest
    }
}

impl From<StoreError> for ChatFailure {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::NotFound,
            other => {
                tracing::error!(event = "store.call", error = %other);
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ChatFailure {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Unauthorized => record_auth_failure("unauthorized"),
            Self::Forbidden => record_auth_failure("forbidden"),
            Self::InvalidRequest | Self::NotFound | Self::PollExpired | Self::Internal => {}
        }

        (self.status(), Json(ErrorBody { error: self.code() })).into_response()
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
