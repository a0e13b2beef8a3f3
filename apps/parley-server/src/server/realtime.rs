pub(crate) mod admission;
pub(crate) mod connection_registry;
pub(crate) mod fanout;
pub(crate) mod ingress;
pub(crate) mod ingress_rate_limit;
pub(crate) mod presence;

use std::{ops::ControlFlow, time::Duration};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parley_core::UserId;
use parley_protocol::{ConnectionAck, ErrorNotice, EventKind};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use self::{
    admission::{admit, release, screen_admission, AdmissionRejection},
    connection_registry::ConnectionHandle,
    ingress::handle_client_payload,
    ingress_rate_limit::IngressWindow,
};
use super::{
    auth::{bearer_token, now_unix_millis, Identity},
    core::{AppState, ConnectionControl, CLOSE_POLICY_VIOLATION, GATEWAY_PING_INTERVAL_SECS},
    errors::ChatFailure,
    metrics::{
        record_gateway_event_emitted, record_gateway_event_parse_rejected,
        record_gateway_event_serialize_error, record_ws_disconnect,
    },
    types::GatewayAuthQuery,
};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Admission endpoint. A missing token is refused before the upgrade; any
/// other rejection upgrades and immediately closes with a policy code.
pub(crate) async fn gateway_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<GatewayAuthQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ChatFailure> {
    let token = query
        .token
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(&headers).map(ToOwned::to_owned))
        .ok_or(ChatFailure::Unauthorized)?;
    let admission = screen_admission(&state, &token).await;

    Ok(ws.on_upgrade(move |socket| async move {
        match admission {
            Ok(identity) => handle_gateway_connection(state, socket, identity).await,
            Err(rejection) => reject_connection(socket, &rejection).await,
        }
    }))
}

async fn reject_connection(mut socket: WebSocket, rejection: &AdmissionRejection) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: rejection.close_code(),
            reason: rejection.reason().into(),
        })))
        .await;
    record_ws_disconnect(rejection.reason());
}

pub(crate) async fn handle_gateway_connection(
    state: AppState,
    socket: WebSocket,
    identity: Identity,
) {
    let user_id = identity.user_id;
    let (mut sink, mut stream) = socket.split();

    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(state.runtime.gateway_outbound_queue);
    let (control_tx, control_rx) = watch::channel(ConnectionControl::Open);
    let mut closing_rx = control_tx.subscribe();
    let registration = admit(
        &state,
        user_id,
        ConnectionHandle {
            outbound: outbound_tx,
            control: control_tx,
        },
    )
    .await;
    let connection_id = registration.connection_id;
    let live_connections = state.registry.connection_count().await;
    tracing::info!(
        event = "gateway.admission",
        connection_id = %connection_id,
        user_id = %user_id,
        email = identity.email.as_deref(),
        token_expires_at = identity.expires_at_unix,
        first_connection = registration.first_connection,
        live_connections,
        "connection admitted"
    );

    // Sent before the writer starts so it precedes anything fanned out meanwhile.
    let ack_sent = send_connection_ack(&mut sink, user_id).await;
    let mut writer = tokio::spawn(run_gateway_writer(sink, outbound_rx, control_rx));

    let disconnect_reason = if ack_sent {
        receive_loop(&state, connection_id, user_id, &mut stream, &mut closing_rx).await
    } else {
        "socket_error"
    };

    release(&state, connection_id).await;
    record_ws_disconnect(disconnect_reason);
    tracing::info!(
        event = "gateway.disconnect",
        connection_id = %connection_id,
        user_id = %user_id,
        reason = disconnect_reason,
    );

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

async fn send_connection_ack(sink: &mut SplitSink<WebSocket, Message>, user_id: UserId) -> bool {
    let event_type = EventKind::Connection.as_str();
    let Ok(payload) = serde_json::to_string(&ConnectionAck::connected(user_id, now_unix_millis()))
    else {
        record_gateway_event_serialize_error("connection", event_type);
        return true;
    };
    if sink.send(Message::Text(payload.into())).await.is_err() {
        return false;
    }
    record_gateway_event_emitted("connection", event_type);
    true
}

async fn run_gateway_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut control_rx: watch::Receiver<ConnectionControl>,
) {
    let mut ping_interval =
        tokio::time::interval(Duration::from_secs(GATEWAY_PING_INTERVAL_SECS));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            control_change = control_rx.changed() => {
                if control_change.is_err() {
                    break;
                }
                let control = *control_rx.borrow_and_update();
                if let ConnectionControl::Close { code, reason } = control {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
            maybe_payload = outbound_rx.recv() => {
                match maybe_payload {
                    Some(payload) => {
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Runs until the peer goes away or the connection is told to close, and
/// returns the disconnect reason.
async fn receive_loop(
    state: &AppState,
    connection_id: Uuid,
    user_id: UserId,
    stream: &mut SplitStream<WebSocket>,
    closing_rx: &mut watch::Receiver<ConnectionControl>,
) -> &'static str {
    let mut ingress = IngressWindow::new(
        state.runtime.gateway_ingress_events_per_window,
        state.runtime.gateway_ingress_window,
    );

    loop {
        let flow = tokio::select! {
            control_change = closing_rx.changed() => {
                if control_change.is_err() {
                    return "connection_closed";
                }
                match *closing_rx.borrow_and_update() {
                    ConnectionControl::Close { reason, .. } => ControlFlow::Break(reason),
                    ConnectionControl::Open => ControlFlow::Continue(()),
                }
            }
            incoming = stream.next() => match incoming {
                None => ControlFlow::Break("connection_closed"),
                Some(Err(_)) => ControlFlow::Break("socket_error"),
                Some(Ok(Message::Close(_))) => ControlFlow::Break("client_close"),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => ControlFlow::Continue(()),
                Some(Ok(Message::Text(text))) => {
                    process_frame(
                        state,
                        connection_id,
                        user_id,
                        &mut ingress,
                        text.as_bytes(),
                    )
                    .await
                }
                Some(Ok(Message::Binary(bytes))) => {
                    process_frame(state, connection_id, user_id, &mut ingress, &bytes).await
                }
            },
        };
        if let ControlFlow::Break(reason) = flow {
            return reason;
        }
    }
}

async fn process_frame(
    state: &AppState,
    connection_id: Uuid,
    user_id: UserId,
    ingress: &mut IngressWindow,
    payload: &[u8],
) -> ControlFlow<&'static str> {
    if !ingress.allow() {
        state
            .registry
            .request_close(connection_id, CLOSE_POLICY_VIOLATION, "rate_limited")
            .await;
        return ControlFlow::Break("rate_limited");
    }

    let notice = if payload.len() > state.runtime.max_gateway_event_bytes {
        record_gateway_event_parse_rejected("ingress", "oversized_payload");
        Some(ErrorNotice::new("oversized_payload"))
    } else {
        handle_client_payload(state, connection_id, user_id, payload).await
    };
    if let Some(notice) = notice {
        send_error_notice(state, connection_id, &notice).await;
    }
    ControlFlow::Continue(())
}

async fn send_error_notice(state: &AppState, connection_id: Uuid, notice: &ErrorNotice) {
    let event_type = EventKind::Error.as_str();
    match serde_json::to_string(notice) {
        Ok(payload) => {
            state
                .registry
                .deliver(connection_id, &payload, event_type, "connection")
                .await;
        }
        Err(_) => record_gateway_event_serialize_error("connection", event_type),
    }
}
