//! Validation for the individual config sections.

use std::sync::LazyLock;

use regex::Regex;

use crate::schema::{ClasscastConfig, IceServerKind};

use super::helpers::validate_range;

/// `ws://host[:port][/path]` or `wss://...`.
static WS_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^wss?://[^\s/]+(/\S*)?$").unwrap());

/// `stun:host[:port]` or `turn(s):host[:port][?transport=...]`.
static ICE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(stun|turns?):[A-Za-z0-9.\-\[\]:]+(\?\S*)?$").unwrap());

/// Validate signaling connection settings.
pub(crate) fn validate_signaling(errors: &mut Vec<String>, config: &ClasscastConfig) {
    let s = &config.signaling;
    if !WS_URL_RE.is_match(&s.url) {
        errors.push(format!("signaling.url = {:?} is not a ws:// or wss:// URL", s.url));
    }
    validate_range(errors, "signaling.connect_timeout_secs", s.connect_timeout_secs, 1, 120);
    validate_range(errors, "signaling.heartbeat_interval_secs", s.heartbeat_interval_secs, 5, 300);
    validate_range(errors, "signaling.reconnect_delay_secs", s.reconnect_delay_secs, 1, 60);
    validate_range(
        errors,
        "signaling.max_reconnect_delay_secs",
        s.max_reconnect_delay_secs,
        1,
        600,
    );
    if s.reconnect_delay_secs > s.max_reconnect_delay_secs {
        errors.push(format!(
            "signaling.reconnect_delay_secs ({}) exceeds signaling.max_reconnect_delay_secs ({})",
            s.reconnect_delay_secs, s.max_reconnect_delay_secs
        ));
    }
}

/// Validate ICE servers: known scheme, TURN servers carry credentials.
pub(crate) fn validate_ice(errors: &mut Vec<String>, config: &ClasscastConfig) {
    for (i, server) in config.ice.servers.iter().enumerate() {
        let url = server.url_with_scheme();
        if !ICE_URL_RE.is_match(&url) {
            errors.push(format!("ice.servers[{i}].url = {:?} is not a STUN/TURN URL", server.url));
        }
        let is_turn = server.kind == IceServerKind::Turn || url.starts_with("turn");
        if is_turn && (server.username.is_none() || server.credential.is_none()) {
            errors.push(format!(
                "ice.servers[{i}] is a TURN server but has no username/credential"
            ));
        }
    }
}

/// Validate negotiation timing and retry policy.
pub(crate) fn validate_negotiation(errors: &mut Vec<String>, config: &ClasscastConfig) {
    let n = &config.negotiation;
    validate_range(errors, "negotiation.timeout_secs", n.timeout_secs, 1, 300);
    validate_range(errors, "negotiation.max_link_retries", n.max_link_retries, 0, 10);
    validate_range(errors, "negotiation.retry_delay_ms", n.retry_delay_ms, 0, 60_000);
    validate_range(errors, "negotiation.sweep_interval_ms", n.sweep_interval_ms, 50, 10_000);
}

/// Validate message limits.
pub(crate) fn validate_messages(errors: &mut Vec<String>, config: &ClasscastConfig) {
    validate_range(errors, "messages.max_history", config.messages.max_history, 1, 10_000);
    validate_range(errors, "messages.max_length", config.messages.max_length, 1, 10_000);
}

/// Validate relay server settings.
pub(crate) fn validate_relay(errors: &mut Vec<String>, config: &ClasscastConfig) {
    let r = &config.relay;
    if r.port == 0 {
        errors.push("relay.port must not be 0".to_string());
    }
    validate_range(errors, "relay.hello_timeout_secs", r.hello_timeout_secs, 1, 60);
    validate_range(errors, "relay.session_ttl_secs", r.session_ttl_secs, 10, 86_400);
    validate_range(errors, "relay.reap_interval_secs", r.reap_interval_secs, 1, 3600);
    validate_range(errors, "relay.max_participants", r.max_participants, 2, 500);
}
