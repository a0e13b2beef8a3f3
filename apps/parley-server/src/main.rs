#![forbid(unsafe_code)]

use std::net::SocketAddr;

use parley_server::{build_router, init_tracing, AppConfig};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let token_secret = std::env::var("PARLEY_TOKEN_SECRET")
        .map_err(|_| anyhow::anyhow!("PARLEY_TOKEN_SECRET is required"))?;
    let database_url = std::env::var("PARLEY_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("PARLEY_DATABASE_URL is required for runtime"))?;
    let defaults = AppConfig::default();
    let app_config = AppConfig {
        token_secret,
        database_url: Some(database_url),
        gateway_outbound_queue: env_or(
            "PARLEY_GATEWAY_OUTBOUND_QUEUE",
            defaults.gateway_outbound_queue,
        )?,
        max_outbound_event_bytes: env_or(
            "PARLEY_MAX_OUTBOUND_EVENT_BYTES",
            defaults.max_outbound_event_bytes,
        )?,
        ..defaults
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("PARLEY_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid PARLEY_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "parley-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn env_or(name: &str, default: usize) -> anyhow::Result<usize> {
    std::env::var(name).map_or(Ok(default), |value| {
        value
            .parse::<usize>()
            .map_err(|e| anyhow::anyhow!("invalid {name} value {value:?}: {e}"))
    })
}
