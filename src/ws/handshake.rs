//! Client side of the WebSocket opening handshake.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// GUID appended to the key when computing `Sec-WebSocket-Accept`.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value for a client key.
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a random 16-byte, base64-encoded `Sec-WebSocket-Key`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the system random source fails.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(e.to_string()))?;
    Ok(BASE64.encode(nonce))
}

/// Opening handshake request.
#[derive(Debug, Clone)]
pub struct HandshakeRequest<'a> {
    /// Value of the `Host` header.
    pub host: &'a str,
    /// Request path and query.
    pub path: &'a str,
    /// `Sec-WebSocket-Key` value.
    pub key: &'a str,
    /// Extra headers (cookies, auth) sent after the required ones.
    pub headers: &'a [(String, String)],
}

impl HandshakeRequest<'_> {
    /// Serialize the request.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.path, self.host, self.key
        );
        for (name, value) in self.headers {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");
        request.into_bytes()
    }
}

/// Verify the server's handshake response head against the key we sent.
///
/// # Errors
///
/// Returns [`Error::InvalidHandshake`] if:
/// - The data is not valid UTF-8 or the status is not `101`.
/// - `Upgrade` is not `websocket` or `Connection` lacks `upgrade`.
/// - `Sec-WebSocket-Accept` is missing or does not match `key`.
pub fn verify_response(head: &[u8], key: &str) -> Result<()> {
    let text =
        std::str::from_utf8(head).map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    if !status_line.starts_with("HTTP/1.1 101") {
        return Err(Error::InvalidHandshake(format!(
            "Expected 101 status, got: {}",
            status_line
        )));
    }

    let headers = parse_headers(lines);

    let upgrade = headers
        .get("upgrade")
        .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header".into()))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Upgrade header: {}",
            upgrade
        )));
    }

    let connection = headers
        .get("connection")
        .ok_or_else(|| Error::InvalidHandshake("Missing Connection header".into()))?;
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Connection header: {}",
            connection
        )));
    }

    let accept = headers
        .get("sec-websocket-accept")
        .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?;
    if *accept != compute_accept_key(key) {
        return Err(Error::InvalidHandshake("Sec-WebSocket-Accept mismatch".into()));
    }

    Ok(())
}

/// Header lines into a map keyed by lowercase name.
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, String> {
    lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect()
}
