//! Commented default config written on first run.

pub(crate) fn default_config_toml() -> String {
    r#"# Chorus configuration
# Every key is optional; omitted keys use the defaults shown here.

[server]
# Address the presence server listens on.
bind = "0.0.0.0:7400"
# Seconds a new connection has to authenticate.
hello_timeout_secs = 10

[server.auth]
# "static": tokens must match an entry below.
# "trust": development only, the token is "id" or "id:Display Name".
mode = "static"

# [[server.auth.users]]
# token = "change-me"
# id = "alice"
# display_name = "Alice"
# avatar = "https://example.com/alice.png"

[server.relay]
# Reject signals to identities without a live session instead of dropping them.
report_absent_target = false

[server.rooms]
# Reject status updates for rooms/participants that do not exist.
report_missing_status_target = false
# 0 = unlimited
max_participants = 0

[server.messages]
max_content_len = 4000
history_per_channel = 500

[client]
url = "ws://127.0.0.1:7400"
token = ""

[client.connection]
connect_timeout_secs = 15
reconnect_delay_ms = 500
max_reconnect_delay_ms = 30000
max_reconnect_attempts = 8
ack_timeout_ms = 5000
ack_timeout_per_retry_ms = 1000
max_ack_timeout_ms = 15000
heartbeat_interval_secs = 25

[client.speaking]
threshold = 0.02
smoothing = 0.6
poll_interval_ms = 50

[logging]
level = "chorus_server=info"
"#
    .to_string()
}
