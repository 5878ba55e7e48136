//! Message codec seam.
//!
//! The engine never interprets application payloads; it hands every outgoing
//! payload to a [`Codec`] before emitting it to the transport, and every raw
//! inbound packet to the same codec before the transform pipeline sees it.

use serde_json::Value;

use crate::Result;

/// Encode/decode boundary between the lifecycle engine and the wire.
///
/// Implementations must be infallible in the sense of base contracts: a
/// failed encode drops that payload and a failed decode drops that packet,
/// both surfacing as listener-gated `error` events rather than halting the
/// connection.
pub trait Codec: Send + Sync + 'static {
    /// Encode a payload into its wire representation.
    fn encode(&self, data: &Value) -> Result<String>;

    /// Decode a raw wire packet into a payload.
    fn decode(&self, raw: &str) -> Result<Value>;
}

/// Default JSON codec.
///
/// Escapes U+2028 (line separator) and U+2029 (paragraph separator) in its
/// own encode step; both are valid JSON but terminate lines in JavaScript
/// source contexts, so servers bridging to browser runtimes expect them
/// escaped.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, data: &Value) -> Result<String> {
        let encoded = serde_json::to_string(data)?;
        if encoded.contains(['\u{2028}', '\u{2029}']) {
            Ok(encoded
                .replace('\u{2028}', "\\u2028")
                .replace('\u{2029}', "\\u2029"))
        } else {
            Ok(encoded)
        }
    }

    fn decode(&self, raw: &str) -> Result<Value> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Kind;

    #[test]
    fn round_trips_ordinary_payloads() {
        let codec = JsonCodec;
        let payload = json!({"room": "lobby", "seq": 7});

        let raw = codec.encode(&payload).expect("encode");
        assert_eq!(codec.decode(&raw).expect("decode"), payload);
    }

    #[test]
    fn escapes_line_and_paragraph_separators() {
        let codec = JsonCodec;
        let payload = json!("a\u{2028}b\u{2029}c");

        let raw = codec.encode(&payload).expect("encode");
        assert_eq!(raw, "\"a\\u2028b\\u2029c\"");
        // The escaped form still decodes to the original string
        assert_eq!(codec.decode(&raw).expect("decode"), payload);
    }

    #[test]
    fn decode_failure_is_a_codec_error() {
        let codec = JsonCodec;
        let err = codec.decode("{truncated").expect_err("must fail");
        assert_eq!(err.kind(), Kind::Codec);
    }
}
