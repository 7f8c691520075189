//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Classcast Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[signaling]
# url = "ws://localhost:5000/ws"   # ws:// or wss://
# connect_timeout_secs = 15        # 1-120
# heartbeat_interval_secs = 25     # 5-300
# reconnect_delay_secs = 1         # first backoff step
# max_reconnect_delay_secs = 30    # backoff ceiling

[ice]
# [[ice.servers]]
# type = "stun"
# url = "stun:stun.l.google.com:19302"
#
# [[ice.servers]]
# type = "turn"
# url = "turn:turn.example.org:3478"
# username = "classroom"
# credential = "change-me"

[negotiation]
# timeout_secs = 15          # 1-300, an offer unanswered this long is abandoned
# max_link_retries = 3       # 0-10, rebuilds of a failed link before giving up
# retry_delay_ms = 1000      # 0-60000
# sweep_interval_ms = 500    # 50-10000

[capture]
# quality = "medium"         # low, medium, high, ultra
# audio = true

[messages]
# max_history = 500          # 1-10000
# max_length = 1000          # 1-10000 characters

[relay]
# bind_address = "0.0.0.0"
# port = 5000
# hello_timeout_secs = 10    # 1-60
# session_ttl_secs = 300     # 10-86400
# reap_interval_secs = 60
# max_participants = 64      # 2-500

[logging]
# level = "INFO"             # TRACE, DEBUG, INFO, WARN, ERROR
"##
    .to_string()
}
