//! Configuration for a load-test run.
//!
//! [`Config`] is the fully-resolved options object the engine consumes.
//! [`Config::resolve`] is the single validation step shared by every client
//! kind: it parses the target, picks the client realization and rejects
//! option combinations that are meaningless for it before any traffic is sent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use url::Url;

use crate::client::{RequestOutcome, ResponseView};
use crate::error::{Error, Result};

/// Produces a request body from the request index.
pub type BodyGenerator = Arc<dyn Fn(u64) -> Bytes + Send + Sync>;

/// Observes every completed request before the next one is dispatched.
pub type StatusCallback = Arc<dyn Fn(&RequestOutcome) + Send + Sync>;

/// Inspects a response; returning `Some(code)` records it as an error.
pub type ContentInspector = Arc<dyn Fn(&ResponseView<'_>) -> Option<String> + Send + Sync>;

/// Produces the value substituted for the index token.
pub type IndexCallback = Arc<dyn Fn() -> String + Send + Sync>;

/// Fully custom request construction for the library-backed client.
///
/// Supplying a generator makes index substitution, the configured body,
/// headers, cookies and the automatic `Content-Length` the generator's
/// responsibility: the engine hands over the shared client and the target
/// and sends whatever request comes back.
pub trait RequestGenerator: Send + Sync {
    /// Build the request with the given index.
    fn generate(&self, client: &reqwest::Client, url: &Url, index: u64) -> reqwest::RequestBuilder;
}

/// Request body.
#[derive(Clone)]
pub enum Body {
    /// Raw bytes sent verbatim.
    Bytes(Bytes),
    /// UTF-8 text sent verbatim.
    Text(String),
    /// JSON value, serialized once per request.
    Json(serde_json::Value),
    /// Body produced per request from its index.
    Generator(BodyGenerator),
}

impl Body {
    /// Render the body for the request with the given index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if a JSON body cannot be serialized.
    pub fn to_bytes(&self, index: u64) -> Result<Bytes> {
        match self {
            Body::Bytes(bytes) => Ok(bytes.clone()),
            Body::Text(text) => Ok(Bytes::from(text.clone())),
            Body::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| Error::InvalidOption(format!("body: {}", e))),
            Body::Generator(generate) => Ok(generate(index)),
        }
    }

    /// Render the body as a JSON value for WebSocket envelopes.
    #[must_use]
    pub fn to_json(&self, index: u64) -> serde_json::Value {
        match self {
            Body::Json(value) => value.clone(),
            Body::Text(text) => serde_json::Value::String(text.clone()),
            Body::Bytes(bytes) => {
                serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
            Body::Generator(generate) => {
                serde_json::Value::String(String::from_utf8_lossy(&generate(index)).into_owned())
            }
        }
    }

    /// Content type implied by the body, if any.
    #[must_use]
    pub const fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Body::Json(_) => Some("application/json"),
            Body::Text(_) => Some("text/plain"),
            Body::Bytes(_) | Body::Generator(_) => None,
        }
    }

    fn is_generator(&self) -> bool {
        matches!(self, Body::Generator(_))
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Body::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Body::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Body::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// How HTTP targets are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientMode {
    /// Buffered client backed by `reqwest`.
    #[default]
    Library,
    /// Literal request bytes over a raw socket, parsed by [`ResponseParser`](crate::http::ResponseParser).
    RawSocket,
}

/// Client realization selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// Library-backed HTTP client.
    Http,
    /// Raw-socket HTTP/1.1 client.
    RawSocket,
    /// Full-duplex WebSocket client.
    WebSocket,
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKind::Http => write!(f, "HTTP"),
            ClientKind::RawSocket => write!(f, "raw-socket"),
            ClientKind::WebSocket => write!(f, "WebSocket"),
        }
    }
}

/// TLS options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Accept invalid certificates (library client only).
    pub insecure: bool,
    /// PEM bundle of extra root certificates.
    pub ca_file: Option<PathBuf>,
}

/// Load-test configuration.
#[derive(Clone)]
pub struct Config {
    /// Target URL (`http`, `https`, `ws` or `wss`).
    pub url: String,

    /// Request method.
    ///
    /// Default: GET
    pub method: Method,

    /// Number of clients in closed-loop mode.
    ///
    /// Default: 10
    pub concurrency: usize,

    /// Target rate; switches the run to open-loop dispatch.
    pub requests_per_second: Option<f64>,

    /// Stop after this many completed requests.
    pub max_requests: Option<u64>,

    /// Stop after this much wall-clock time.
    pub max_seconds: Option<Duration>,

    /// Per-request timeout.
    pub timeout: Option<Duration>,

    /// Extra request headers, sent in order.
    pub headers: Vec<(String, String)>,

    /// Cookies, joined into one `Cookie` header.
    pub cookies: Vec<(String, String)>,

    /// Request body.
    pub body: Option<Body>,

    /// Content type of the body; defaults to the body's own.
    pub content_type: Option<String>,

    /// Reuse connections between requests.
    ///
    /// Default: true
    pub keep_alive: bool,

    /// Proxy URL (library client only).
    pub proxy: Option<String>,

    /// TLS options.
    pub tls: TlsOptions,

    /// Client used for `http`/`https` targets.
    pub mode: ClientMode,

    /// Token replaced by a unique value in the URL and body of every request.
    pub index_param: Option<String>,

    /// Custom generator for index values.
    pub index_param_callback: Option<IndexCallback>,

    /// Fully custom request construction.
    pub request_generator: Option<Arc<dyn RequestGenerator>>,

    /// Synchronous per-request observer.
    pub status_callback: Option<StatusCallback>,

    /// Response inspector flagging application-level errors.
    pub content_inspector: Option<ContentInspector>,

    /// Keep running after transport errors.
    ///
    /// Default: true
    pub recover: bool,

    /// Interval between partial progress reports; `None` disables them.
    ///
    /// Default: 5 seconds
    pub report_interval: Option<Duration>,

    /// Suppress partial progress reports.
    pub quiet: bool,
}

impl Config {
    /// Create a configuration for the given target with default options.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            concurrency: 10,
            requests_per_second: None,
            max_requests: None,
            max_seconds: None,
            timeout: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: None,
            content_type: None,
            keep_alive: true,
            proxy: None,
            tls: TlsOptions::default(),
            mode: ClientMode::Library,
            index_param: None,
            index_param_callback: None,
            request_generator: None,
            status_callback: None,
            content_inspector: None,
            recover: true,
            report_interval: Some(Duration::from_secs(5)),
            quiet: false,
        }
    }

    /// Set the request method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the number of closed-loop clients.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Switch to open-loop dispatch at the given rate.
    #[must_use]
    pub const fn with_requests_per_second(mut self, rate: f64) -> Self {
        self.requests_per_second = Some(rate);
        self
    }

    /// Stop after `max` completed requests.
    #[must_use]
    pub const fn with_max_requests(mut self, max: u64) -> Self {
        self.max_requests = Some(max);
        self
    }

    /// Stop after `max` elapsed time.
    #[must_use]
    pub const fn with_max_seconds(mut self, max: Duration) -> Self {
        self.max_seconds = Some(max);
        self
    }

    /// Fail requests that take longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a cookie.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the body content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Enable or disable connection reuse.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Route library-client traffic through a proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Set TLS options.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Select the client used for `http`/`https` targets.
    #[must_use]
    pub const fn with_mode(mut self, mode: ClientMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace `token` with a unique value in every request.
    #[must_use]
    pub fn with_index_param(mut self, token: impl Into<String>) -> Self {
        self.index_param = Some(token.into());
        self
    }

    /// Generate index values with a custom callback.
    #[must_use]
    pub fn with_index_param_callback(mut self, callback: IndexCallback) -> Self {
        self.index_param_callback = Some(callback);
        self
    }

    /// Construct requests with a custom generator.
    #[must_use]
    pub fn with_request_generator(mut self, generator: Arc<dyn RequestGenerator>) -> Self {
        self.request_generator = Some(generator);
        self
    }

    /// Observe every completed request.
    #[must_use]
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.status_callback = Some(callback);
        self
    }

    /// Inspect every response for application-level errors.
    #[must_use]
    pub fn with_content_inspector(mut self, inspector: ContentInspector) -> Self {
        self.content_inspector = Some(inspector);
        self
    }

    /// Keep running (or stop) on the first transport error.
    #[must_use]
    pub const fn with_recover(mut self, recover: bool) -> Self {
        self.recover = recover;
        self
    }

    /// Set the partial report interval.
    #[must_use]
    pub const fn with_report_interval(mut self, interval: Option<Duration>) -> Self {
        self.report_interval = interval;
        self
    }

    /// Suppress partial progress reports.
    #[must_use]
    pub const fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Content type sent with the body.
    #[must_use]
    pub fn effective_content_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .or_else(|| self.body.as_ref().and_then(Body::default_content_type))
    }

    /// Value of the `Cookie` header, if any cookies are configured.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        Some(pairs.join("; "))
    }

    /// Check whether requests carry a substituted index.
    #[must_use]
    pub fn uses_index(&self) -> bool {
        self.request_generator.is_none() && self.index_param.is_some()
    }

    /// Validate the option set and resolve the target.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// - The URL is malformed or uses an unknown scheme.
    /// - `concurrency` is zero, or the target rate is not a positive number
    ///   with a representable timer period.
    /// - A header contains CR or LF characters.
    /// - An option has no meaning for the selected client (see
    ///   [`Error::UnsupportedOption`]).
    pub fn resolve(&self) -> Result<Plan> {
        let url = Url::parse(&self.url).map_err(|e| Error::InvalidUrl(format!("{}: {}", self.url, e)))?;

        let kind = match (url.scheme(), self.mode) {
            ("http" | "https", ClientMode::Library) => ClientKind::Http,
            ("http" | "https", ClientMode::RawSocket) => ClientKind::RawSocket,
            ("ws" | "wss", ClientMode::Library) => ClientKind::WebSocket,
            ("ws" | "wss", ClientMode::RawSocket) => {
                return Err(Error::InvalidOption(
                    "raw-socket mode only drives http:// and https:// targets".into(),
                ));
            }
            (scheme, _) => return Err(Error::UnsupportedScheme(scheme.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("{}: missing host", self.url)))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidUrl(format!("{}: missing port", self.url)))?;
        let secure = matches!(url.scheme(), "https" | "wss");

        if self.concurrency == 0 {
            return Err(Error::InvalidOption("concurrency must be at least 1".into()));
        }

        if let Some(rate) = self.requests_per_second {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(Error::InvalidOption(format!(
                    "requests_per_second must be a positive number, got {}",
                    rate
                )));
            }
            crate::timer::period_for_rate(rate)?;
            if kind == ClientKind::WebSocket {
                return Err(Error::UnsupportedOption {
                    option: "requests_per_second",
                    client: kind,
                });
            }
        }

        for (name, value) in self.headers.iter().chain(self.cookies.iter()) {
            validate_header_name(name)?;
            validate_header_value(name, value)?;
        }
        if let Some(content_type) = &self.content_type {
            validate_header_value("Content-Type", content_type)?;
        }

        if let Some(body) = &self.body {
            body.to_bytes(0)?;
        }

        self.check_client_options(kind, secure)?;

        if self.request_generator.is_some() && self.index_param.is_some() {
            tracing::warn!("index_param is ignored when a request generator is configured");
        }

        Ok(Plan {
            kind,
            host_header: host_header(&url, &host),
            path: request_path(&url),
            url,
            host,
            port,
            secure,
        })
    }

    fn check_client_options(&self, kind: ClientKind, secure: bool) -> Result<()> {
        let reject = |option: &'static str| Err(Error::UnsupportedOption { option, client: kind });

        match kind {
            ClientKind::Http => Ok(()),
            ClientKind::RawSocket => {
                if self.request_generator.is_some() {
                    return reject("request_generator");
                }
                if self.index_param.is_some() || self.index_param_callback.is_some() {
                    return reject("index_param");
                }
                if self.status_callback.is_some() {
                    return reject("status_callback");
                }
                if self.content_inspector.is_some() {
                    return reject("content_inspector");
                }
                if self.proxy.is_some() {
                    return reject("proxy");
                }
                if self.body.as_ref().is_some_and(Body::is_generator) {
                    return reject("body generator");
                }
                check_socket_tls(&self.tls, kind, secure)
            }
            ClientKind::WebSocket => {
                if self.request_generator.is_some() {
                    return reject("request_generator");
                }
                if self.proxy.is_some() {
                    return reject("proxy");
                }
                check_socket_tls(&self.tls, kind, secure)
            }
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("concurrency", &self.concurrency)
            .field("requests_per_second", &self.requests_per_second)
            .field("max_requests", &self.max_requests)
            .field("max_seconds", &self.max_seconds)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("keep_alive", &self.keep_alive)
            .field("mode", &self.mode)
            .field("index_param", &self.index_param)
            .field("recover", &self.recover)
            .finish_non_exhaustive()
    }
}

fn check_socket_tls(tls: &TlsOptions, kind: ClientKind, secure: bool) -> Result<()> {
    if tls.insecure {
        return Err(Error::UnsupportedOption {
            option: "tls.insecure",
            client: kind,
        });
    }
    if secure && !cfg!(feature = "tls-rustls") {
        return Err(Error::UnsupportedOption {
            option: "https/wss (enable the `tls-rustls` feature)",
            client: kind,
        });
    }
    Ok(())
}

/// Validate that a header value does not contain CR or LF characters.
///
/// # Errors
/// Returns `Error::InvalidHeaderValue` if the value contains `\r` or `\n`.
fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

fn validate_header_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':');
    if !valid {
        return Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "invalid header name".to_string(),
        });
    }
    Ok(())
}

fn host_header(url: &Url, host: &str) -> String {
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn request_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Target and client selection produced by [`Config::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Selected client realization.
    pub kind: ClientKind,
    /// Parsed target URL.
    pub url: Url,
    /// Host to connect to.
    pub host: String,
    /// Port to connect to.
    pub port: u16,
    /// Whether the connection uses TLS.
    pub secure: bool,
    /// Value of the `Host` header.
    pub host_header: String,
    /// Path and query sent on the request line.
    pub path: String,
}
