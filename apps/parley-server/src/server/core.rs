use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::anyhow;

use super::{
    auth::TokenVerifier,
    realtime::{
        connection_registry::ConnectionRegistry, fanout::FanoutDispatcher,
        presence::PresenceTracker,
    },
    store::{ChatStore, InMemoryChatStore, PgChatStore},
};

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 1_048_576;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_GATEWAY_INGRESS_EVENTS_PER_WINDOW: u32 = 20;
pub const DEFAULT_GATEWAY_INGRESS_WINDOW_SECS: u64 = 10;
pub const DEFAULT_GATEWAY_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_MAX_GATEWAY_EVENT_BYTES: usize = parley_protocol::MAX_EVENT_BYTES;
pub const DEFAULT_MAX_OUTBOUND_EVENT_BYTES: usize = 1_048_576;
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub(crate) const GATEWAY_PING_INTERVAL_SECS: u64 = 30;
pub(crate) const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub(crate) const CLOSE_INTERNAL_ERROR: u16 = 1011;
pub(crate) const MAX_POLL_EXPIRY_HOURS: u32 = 24 * 365;
pub(crate) const DEFAULT_HISTORY_PAGE: u32 = 50;
pub(crate) const MAX_HISTORY_PAGE: u32 = 100;
pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) auth_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) ws_disconnects: Mutex<HashMap<&'static str, u64>>,
    pub(crate) gateway_events_emitted: Mutex<HashMap<(String, String), u64>>,
    pub(crate) gateway_events_dropped: Mutex<HashMap<(String, String, String), u64>>,
    pub(crate) gateway_events_unknown_received: Mutex<HashMap<(String, String), u64>>,
    pub(crate) gateway_events_parse_rejected: Mutex<HashMap<(String, String), u64>>,
    pub(crate) presence_write_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) fanout_failures: Mutex<HashMap<&'static str, u64>>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    pub gateway_ingress_events_per_window: u32,
    pub gateway_ingress_window: Duration,
    pub gateway_outbound_queue: usize,
    /// Inbound frame ceiling.
    pub max_gateway_event_bytes: usize,
    /// Ceiling for server-built events, which can outgrow client frames.
    pub max_outbound_event_bytes: usize,
    pub token_secret: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            gateway_ingress_events_per_window: DEFAULT_GATEWAY_INGRESS_EVENTS_PER_WINDOW,
            gateway_ingress_window: Duration::from_secs(DEFAULT_GATEWAY_INGRESS_WINDOW_SECS),
            gateway_outbound_queue: DEFAULT_GATEWAY_OUTBOUND_QUEUE,
            max_gateway_event_bytes: DEFAULT_MAX_GATEWAY_EVENT_BYTES,
            max_outbound_event_bytes: DEFAULT_MAX_OUTBOUND_EVENT_BYTES,
            token_secret: String::new(),
            database_url: None,
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
        }
    }
}

#[derive(Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) gateway_ingress_events_per_window: u32,
    pub(crate) gateway_ingress_window: Duration,
    pub(crate) gateway_outbound_queue: usize,
    pub(crate) max_gateway_event_bytes: usize,
}

/// Signal from the delivery side to a connection's writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionControl {
    Open,
    Close {
        code: u16,
        reason: &'static str,
    },
}

/// Service root. Everything connection-scoped hangs off the injected
/// registry; nothing lives in process-global state except metrics.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<dyn ChatStore>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) presence: PresenceTracker,
    pub(crate) fanout: FanoutDispatcher,
    pub(crate) tokens: Arc<TokenVerifier>,
    pub(crate) runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn ChatStore> = if let Some(database_url) = &config.database_url {
            Arc::new(
                PgChatStore::connect_lazy(database_url, config.database_max_connections)
                    .map_err(|e| anyhow!("postgres pool init failed: {e}"))?,
            )
        } else {
            Arc::new(InMemoryChatStore::new())
        };
        Self::with_store(config, store)
    }

    pub(crate) fn with_store(
        config: &AppConfig,
        store: Arc<dyn ChatStore>,
    ) -> anyhow::Result<Self> {
        let tokens = TokenVerifier::new(config.token_secret.as_bytes())
            .map_err(|e| anyhow!("token verifier init failed: {e}"))?;
        let registry = Arc::new(ConnectionRegistry::new(config.max_outbound_event_bytes));
        let presence = PresenceTracker::spawn(Arc::clone(&store))?;
        let fanout = FanoutDispatcher::new(Arc::clone(&store), Arc::clone(&registry));

        Ok(Self {
            store,
            registry,
            presence,
            fanout,
            tokens: Arc::new(tokens),
            runtime: Arc::new(RuntimeConfig {
                gateway_ingress_events_per_window: config.gateway_ingress_events_per_window,
                gateway_ingress_window: config.gateway_ingress_window,
                gateway_outbound_queue: config.gateway_outbound_queue,
                max_gateway_event_bytes: config.max_gateway_event_bytes,
            }),
        })
    }
}
