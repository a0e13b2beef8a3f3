use std::{collections::HashMap, fmt::Write as _, hash::Hash};

use super::core::{MetricsState, METRICS_STATE};

pub(crate) const GATEWAY_DROP_REASON_OVERSIZED_OUTBOUND: &str = "oversized_outbound";
pub(crate) const GATEWAY_DROP_REASON_SERIALIZE_ERROR: &str = "serialize_error";

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

fn snapshot<K: Clone + Eq + Hash>(
    counters: &std::sync::Mutex<HashMap<K, u64>>,
) -> HashMap<K, u64> {
    counters
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone())
}

fn write_header(output: &mut String, name: &str, help: &str) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
}

#[allow(clippy::too_many_lines)]
pub(crate) fn render_metrics() -> String {
    let state = metrics_state();
    let mut output = String::new();

    write_header(
        &mut output,
        "parley_auth_failures_total",
        "Count of auth-related failures by reason",
    );
    let mut auth_entries: Vec<_> = snapshot(&state.auth_failures).into_iter().collect();
    auth_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in auth_entries {
        let _ = writeln!(
            output,
            "parley_auth_failures_total{{reason=\"{reason}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "parley_ws_disconnects_total",
        "Count of websocket disconnect events by reason",
    );
    let mut ws_entries: Vec<_> = snapshot(&state.ws_disconnects).into_iter().collect();
    ws_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in ws_entries {
        let _ = writeln!(
            output,
            "parley_ws_disconnects_total{{reason=\"{reason}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "parley_gateway_events_emitted_total",
        "Count of emitted gateway events by scope and type",
    );
    let mut emitted_entries: Vec<_> = snapshot(&state.gateway_events_emitted)
        .into_iter()
        .collect();
    emitted_entries.sort();
    for ((scope, event_type), value) in emitted_entries {
        let _ = writeln!(
            output,
            "parley_gateway_events_emitted_total{{scope=\"{scope}\",event_type=\"{event_type}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "parley_gateway_events_dropped_total",
        "Count of dropped gateway events by scope, type, and reason",
    );
    let mut dropped_entries: Vec<_> = snapshot(&state.gateway_events_dropped)
        .into_iter()
        .collect();
    dropped_entries.sort();
    for ((scope, event_type, reason), value) in dropped_entries {
        let _ = writeln!(
            output,
            "parley_gateway_events_dropped_total{{scope=\"{scope}\",event_type=\"{event_type}\",reason=\"{reason}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "parley_gateway_events_unknown_received_total",
        "Count of unknown gateway events received by scope and event type",
    );
    let mut unknown_entries: Vec<_> = snapshot(&state.gateway_events_unknown_received)
        .into_iter()
        .collect();
    unknown_entries.sort();
    for ((scope, event_type), value) in unknown_entries {
        let _ = writeln!(
            output,
            "parley_gateway_events_unknown_received_total{{scope=\"{scope}\",event_type=\"{event_type}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "parley_gateway_events_parse_rejected_total",
        "Count of gateway events rejected during parsing by scope and reason",
    );
    let mut parse_rejected_entries: Vec<_> = snapshot(&state.gateway_events_parse_rejected)
        .into_iter()
        .collect();
    parse_rejected_entries.sort();
    for ((scope, reason), value) in parse_rejected_entries {
        let _ = writeln!(
            output,
            "parley_gateway_events_parse_rejected_total{{scope=\"{scope}\",reason=\"{reason}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "parley_presence_write_failures_total",
        "Count of presence status writes that failed by transition",
    );
    let mut presence_entries: Vec<_> = snapshot(&state.presence_write_failures)
        .into_iter()
        .collect();
    presence_entries.sort_by_key(|(transition, _)| *transition);
    for (transition, value) in presence_entries {
        let _ = writeln!(
            output,
            "parley_presence_write_failures_total{{transition=\"{transition}\"}} {value}"
        );
    }

    write_header(
        &mut output,
        "parley_fanout_failures_total",
        "Count of abandoned fan-outs by reason",
    );
    let mut fanout_entries: Vec<_> = snapshot(&state.fanout_failures).into_iter().collect();
    fanout_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in fanout_entries {
        let _ = writeln!(
            output,
            "parley_fanout_failures_total{{reason=\"{reason}\"}} {value}"
        );
    }

    output
}

fn bump<K: Eq + Hash>(counters: &std::sync::Mutex<HashMap<K, u64>>, key: K) {
    if let Ok(mut counters) = counters.lock() {
        let entry = counters.entry(key).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_auth_failure(reason: &'static str) {
    bump(&metrics_state().auth_failures, reason);
}

pub(crate) fn record_ws_disconnect(reason: &'static str) {
    bump(&metrics_state().ws_disconnects, reason);
}

pub(crate) fn record_gateway_event_emitted(scope: &'static str, event_type: &str) {
    bump(
        &metrics_state().gateway_events_emitted,
        (scope.to_owned(), event_type.to_owned()),
    );
}

pub(crate) fn record_gateway_event_dropped(
    scope: &'static str,
    event_type: &str,
    reason: &'static str,
) {
    bump(
        &metrics_state().gateway_events_dropped,
        (scope.to_owned(), event_type.to_owned(), reason.to_owned()),
    );
}

pub(crate) fn record_gateway_event_serialize_error(scope: &'static str, event_type: &str) {
    record_gateway_event_dropped(scope, event_type, GATEWAY_DROP_REASON_SERIALIZE_ERROR);
}

pub(crate) fn record_gateway_event_oversized_outbound(scope: &'static str, event_type: &str) {
    record_gateway_event_dropped(scope, event_type, GATEWAY_DROP_REASON_OVERSIZED_OUTBOUND);
}

pub(crate) fn record_gateway_event_unknown_received(scope: &'static str, event_type: &str) {
    bump(
        &metrics_state().gateway_events_unknown_received,
        (scope.to_owned(), event_type.to_owned()),
    );
}

pub(crate) fn record_gateway_event_parse_rejected(scope: &'static str, reason: &str) {
    bump(
        &metrics_state().gateway_events_parse_rejected,
        (scope.to_owned(), reason.to_owned()),
    );
}

pub(crate) fn record_presence_write_failure(transition: &'static str) {
    bump(&metrics_state().presence_write_failures, transition);
}

pub(crate) fn record_fanout_failure(reason: &'static str) {
    bump(&metrics_state().fanout_failures, reason);
}
