use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit},
    http::{request::Request, HeaderName, StatusCode},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    errors::GovernorError, governor::GovernorConfigBuilder, key_extractor::KeyExtractor,
    GovernorLayer,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    core::{AppConfig, AppState},
    handlers::{
        add_member, create_group_chat, create_message, create_poll, get_conversation_stats,
        get_conversations, get_messages, get_poll, mark_read, open_personal_chat, vote_in_poll,
    },
    realtime::gateway_ws,
    store::ChatStore,
    types::{health, metrics},
};

/// Keys the per-IP limiter on the first `x-forwarded-for` hop, falling back
/// to the peer address.
#[derive(Clone, Copy)]
struct ClientIpKeyExtractor;

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|value| value.trim().parse::<IpAddr>().ok());
        let peer_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|value| value.0.ip())
            .or_else(|| req.extensions().get::<SocketAddr>().map(SocketAddr::ip));
        Ok(forwarded
            .or(peer_ip)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
    }
}

fn validate_config(config: &AppConfig) -> anyhow::Result<()> {
    if config.token_secret.is_empty() {
        return Err(anyhow!("token secret must not be empty"));
    }
    if config.max_gateway_event_bytes == 0
        || config.max_gateway_event_bytes > parley_protocol::MAX_EVENT_BYTES
    {
        return Err(anyhow!(
            "gateway event limit must be between 1 and the protocol max of {} bytes",
            parley_protocol::MAX_EVENT_BYTES
        ));
    }
    if config.max_outbound_event_bytes < config.max_gateway_event_bytes {
        return Err(anyhow!(
            "outbound event limit must be at least the inbound limit of {} bytes",
            config.max_gateway_event_bytes
        ));
    }
    if config.gateway_outbound_queue == 0 {
        return Err(anyhow!("gateway outbound queue must hold at least 1 event"));
    }
    if config.gateway_ingress_events_per_window == 0 || config.gateway_ingress_window.is_zero() {
        return Err(anyhow!(
            "gateway ingress limit must allow at least 1 event per non-empty window"
        ));
    }
    if config.rate_limit_requests_per_minute == 0 {
        return Err(anyhow!("rate limit must be at least 1 request per minute"));
    }
    Ok(())
}

/// Build the axum router, picking the store from `database_url`.
///
/// # Errors
/// Returns an error if configured limits are invalid or the database pool
/// cannot be initialized.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    validate_config(config)?;
    let app_state = AppState::new(config)?;
    assemble(config, app_state)
}

/// Build the axum router over an injected store.
///
/// # Errors
/// Returns an error if configured limits are invalid.
pub fn build_router_with_store(
    config: &AppConfig,
    store: Arc<dyn ChatStore>,
) -> anyhow::Result<Router> {
    validate_config(config)?;
    let app_state = AppState::with_store(config, store)?;
    assemble(config, app_state)
}

fn assemble(config: &AppConfig, app_state: AppState) -> anyhow::Result<Router> {
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60))
            .burst_size(config.rate_limit_requests_per_minute)
            .key_extractor(ClientIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("invalid governor configuration"))?,
    );
    let request_id_header = HeaderName::from_static("x-request-id");
    let governor_layer = GovernorLayer::new(governor_config);

    let routes = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/gateway/ws", get(gateway_ws))
        .route("/conversations", get(get_conversations))
        .route("/conversations/personal", post(open_personal_chat))
        .route("/conversations/groups", post(create_group_chat))
        .route(
            "/conversations/{conversation_id}/messages",
            get(get_messages).post(create_message),
        )
        .route("/conversations/{conversation_id}/members", post(add_member))
        .route("/conversations/{conversation_id}/polls", post(create_poll))
        .route(
            "/conversations/{conversation_id}/stats",
            get(get_conversation_stats),
        )
        .route("/messages/{message_id}/read", post(mark_read))
        .route("/polls/{poll_id}", get(get_poll))
        .route("/polls/{poll_id}/votes", post(vote_in_poll));

    Ok(routes
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                ))
                .layer(governor_layer),
        ))
}
