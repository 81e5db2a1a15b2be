//! HTTP upgrade handshake helpers for both protocol generations.

use base64::prelude::*;
use hyper::{header, Request};
use sha1::{Digest, Sha1};

use crate::{RelayError, Result};

/// Fixed GUID appended to the client key when computing the accept token
/// ([RFC 6455 Section 1.3](https://datatracker.ietf.org/doc/html/rfc6455#section-1.3)).
const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a client's key.
pub(crate) fn accept_key(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WS_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Fresh random `Sec-WebSocket-Key` nonce for a client handshake.
pub(crate) fn nonce() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Which framing generation an incoming upgrade request is asking for.
pub(crate) enum HandshakeKind {
    /// RFC 6455 handshake; carries the client's `Sec-WebSocket-Key`.
    Modern { key: Vec<u8> },
    /// Pre-RFC handshake: an upgrade request with no key or version headers.
    Legacy,
}

/// Classifies an incoming upgrade request.
///
/// A request carrying `Sec-WebSocket-Key` must also pin version 13; a
/// request without a key is a legacy client, accepted only when
/// `allow_legacy` is set.
pub(crate) fn classify<B>(request: &Request<B>, allow_legacy: bool) -> Result<HandshakeKind> {
    let headers = request.headers();

    let upgrade_requested = headers
        .get(header::UPGRADE)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !upgrade_requested {
        return Err(RelayError::InvalidUpgradeHeader);
    }

    match headers.get(header::SEC_WEBSOCKET_KEY) {
        Some(key) => {
            if headers
                .get(header::SEC_WEBSOCKET_VERSION)
                .map(|v| v.as_bytes())
                != Some(b"13")
            {
                return Err(RelayError::InvalidSecWebSocketVersion);
            }
            Ok(HandshakeKind::Modern {
                key: key.as_bytes().to_vec(),
            })
        }
        None if allow_legacy => Ok(HandshakeKind::Legacy),
        None => Err(RelayError::MissingSecWebSocketKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request() -> hyper::http::request::Builder {
        Request::builder()
            .method("GET")
            .uri("/")
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "upgrade")
    }

    #[test]
    fn test_accept_key_matches_rfc_example() {
        // the worked example from RFC 6455 section 1.3
        assert_eq!(
            accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_classifies_modern_request() {
        let request = upgrade_request()
            .header(header::SEC_WEBSOCKET_KEY, "AQIDBAUGBwgJCgsMDQ4PEA==")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .body(())
            .unwrap();

        let kind = classify(&request, false).unwrap();
        assert!(matches!(
            kind,
            HandshakeKind::Modern { key } if key == b"AQIDBAUGBwgJCgsMDQ4PEA=="
        ));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let request = upgrade_request()
            .header(header::SEC_WEBSOCKET_KEY, "AQIDBAUGBwgJCgsMDQ4PEA==")
            .header(header::SEC_WEBSOCKET_VERSION, "8")
            .body(())
            .unwrap();

        assert!(matches!(
            classify(&request, true),
            Err(RelayError::InvalidSecWebSocketVersion)
        ));
    }

    #[test]
    fn test_keyless_request_is_legacy_only_when_allowed() {
        let request = upgrade_request().body(()).unwrap();
        assert!(matches!(
            classify(&request, true),
            Ok(HandshakeKind::Legacy)
        ));

        let request = upgrade_request().body(()).unwrap();
        assert!(matches!(
            classify(&request, false),
            Err(RelayError::MissingSecWebSocketKey)
        ));
    }

    #[test]
    fn test_rejects_plain_http_request() {
        let request = Request::builder().method("GET").uri("/").body(()).unwrap();
        assert!(matches!(
            classify(&request, true),
            Err(RelayError::InvalidUpgradeHeader)
        ));
    }
}
