//! Reserved in-band control signals of the Primus wire protocol.
//!
//! These literals travel over the data channel itself; the server and every
//! client implementation must agree on them byte for byte.

use serde_json::Value;

/// Payload (or `incoming::end` reason) announcing an intentional
/// server-initiated close. Suppresses reconnection.
pub const SERVER_CLOSE: &str = "primus::server::close";

/// Prefix of an outgoing heartbeat ping; followed by a millisecond timestamp.
pub const PING_PREFIX: &str = "primus::ping::";

/// Prefix of an inbound pong reply; followed by the id echoed by the server.
pub const PONG_PREFIX: &str = "primus::pong::";

/// Build the heartbeat payload for the given millisecond timestamp.
#[must_use]
pub fn ping_payload(millis: i64) -> String {
    format!("{PING_PREFIX}{millis}")
}

/// Returns true when the decoded payload is the intentional-close sentinel.
#[must_use]
pub fn is_server_close(data: &Value) -> bool {
    data.as_str() == Some(SERVER_CLOSE)
}

/// Extract the pong id from a decoded payload, if it is a pong reply.
///
/// The id is everything after the sentinel prefix.
#[must_use]
pub fn pong_id(data: &Value) -> Option<&str> {
    data.as_str()?.strip_prefix(PONG_PREFIX)
}
