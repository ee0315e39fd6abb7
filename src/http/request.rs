//! Literal HTTP/1.1 request bytes for the raw-socket client.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::{Config, Plan};
use crate::error::Result;

/// Value of the default `User-Agent` header.
pub const USER_AGENT: &str = concat!("rsload/", env!("CARGO_PKG_VERSION"));

/// Build the request the raw-socket client writes for every request.
///
/// The layout is `METHOD PATH HTTP/1.1\r\n`, one `Name: Value\r\n` line per
/// header, a blank line, then the body verbatim. Configured headers replace
/// defaults of the same name (compared case-insensitively) in place and are
/// appended otherwise.
///
/// # Errors
///
/// Returns an error if the configured body cannot be rendered.
pub fn build_request(config: &Config, plan: &Plan) -> Result<Bytes> {
    let body = config.body.as_ref().map(|body| body.to_bytes(0)).transpose()?;

    let mut headers: Vec<(String, String)> = vec![
        ("Host".into(), plan.host_header.clone()),
        ("Accept".into(), "*/*".into()),
        ("User-Agent".into(), USER_AGENT.into()),
    ];
    if let Some(body) = &body {
        headers.push(("Content-Length".into(), body.len().to_string()));
        if let Some(content_type) = config.effective_content_type() {
            headers.push(("Content-Type".into(), content_type.to_string()));
        }
    }
    if let Some(cookie) = config.cookie_header() {
        headers.push(("Cookie".into(), cookie));
    }
    if !config.keep_alive {
        headers.push(("Connection".into(), "close".into()));
    }

    for (name, value) in &config.headers {
        match headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1.clone_from(value),
            None => headers.push((name.clone(), value.clone())),
        }
    }

    let body_len = body.as_ref().map_or(0, Bytes::len);
    let mut buf = BytesMut::with_capacity(256 + body_len);
    buf.put_slice(config.method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(plan.path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    for (name, value) in &headers {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    if let Some(body) = body {
        buf.put_slice(&body);
    }

    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Body, ClientMode};
    use reqwest::Method;

    fn build(config: Config) -> String {
        let config = config.with_mode(ClientMode::RawSocket);
        let plan = config.resolve().unwrap();
        String::from_utf8(build_request(&config, &plan).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_get_request_layout() {
        let request = build(Config::new("http://localhost:8080/path?q=1"));
        assert_eq!(
            request,
            format!(
                "GET /path?q=1 HTTP/1.1\r\nHost: localhost:8080\r\nAccept: */*\r\nUser-Agent: {}\r\n\r\n",
                USER_AGENT
            )
        );
    }

    #[test]
    fn test_post_with_body() {
        let request = build(
            Config::new("http://localhost/submit")
                .with_method(Method::POST)
                .with_body(Body::Json(serde_json::json!({"k": "v"}))),
        );
        assert!(request.starts_with("POST /submit HTTP/1.1\r\nHost: localhost\r\n"));
        assert!(request.contains("\r\nContent-Length: 9\r\n"));
        assert!(request.contains("\r\nContent-Type: application/json\r\n"));
        assert!(request.ends_with("\r\n\r\n{\"k\":\"v\"}"));
    }

    #[test]
    fn test_custom_header_replaces_default() {
        let request = build(
            Config::new("http://localhost/")
                .with_header("user-agent", "custom/1.0")
                .with_header("X-Trace", "abc"),
        );
        assert!(request.contains("\r\nuser-agent: custom/1.0\r\n"));
        assert!(!request.contains(USER_AGENT));
        assert!(request.ends_with("X-Trace: abc\r\n\r\n"));
    }

    #[test]
    fn test_cookies_and_connection_close() {
        let request = build(
            Config::new("http://localhost/")
                .with_cookie("a", "1")
                .with_cookie("b", "2")
                .with_keep_alive(false),
        );
        assert!(request.contains("\r\nCookie: a=1; b=2\r\n"));
        assert!(request.contains("\r\nConnection: close\r\n"));
    }
}
