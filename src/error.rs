//! Error types for the load-generation engine.
//!
//! Only configuration errors abort a run. Transport, parse and application
//! failures of a single request are folded into [`RequestError`] values and
//! counted by the latency tracker instead of escaping the dispatch loop.

use thiserror::Error;

use crate::config::ClientKind;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error-tally key used for transport and parse failures.
pub const TRANSPORT_ERROR_CODE: &str = "-1";

/// Error-tally key used for requests that exceeded the per-request timeout.
pub const TIMEOUT_ERROR_CODE: &str = "timeout";

/// Errors that can occur while configuring or running a load test.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The target URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The target URL uses a scheme no client can serve.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// An option has a value that can never work.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// An option has no meaning for the selected client.
    #[error("Option `{option}` is not supported by the {client} client")]
    UnsupportedOption {
        /// Name of the rejected option.
        option: &'static str,
        /// Client the option was rejected for.
        client: ClientKind,
    },

    /// Header name or value contains invalid characters.
    #[error("Invalid header value for {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Reason for rejection.
        reason: String,
    },

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The status line of a response is malformed.
    #[error("Invalid status line: {0}")]
    InvalidStatusLine(String),

    /// The status code lies outside `100..=599`.
    #[error("Status code out of range: {0}")]
    StatusOutOfRange(u16),

    /// A response that should carry a body has no `Content-Length`.
    #[error("Missing Content-Length header")]
    MissingContentLength,

    /// The `Content-Length` header is not a valid length.
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// A response that must not carry a body arrived with one.
    #[error("Unexpected body of {len} bytes for status {status}")]
    UnexpectedBody {
        /// Response status code.
        status: u16,
        /// Number of body bytes received.
        len: usize,
    },

    /// More body bytes arrived than `Content-Length` announced.
    #[error("Body too long: expected {expected} bytes, received {received}")]
    BodyTooLong {
        /// Announced content length.
        expected: usize,
        /// Body bytes received so far.
        received: usize,
    },

    /// Response headers exceed the parser limit.
    #[error("Response headers too large: {size} bytes (max: {max})")]
    ResponseTooLarge {
        /// Bytes buffered without finding the header boundary.
        size: usize,
        /// Maximum allowed header size.
        max: usize,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// The request did not complete in time.
    #[error("Request timed out")]
    Timeout,

    /// Error reported by the library-backed HTTP client.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },
}

impl Error {
    /// Check if this error is a configuration error, the only class that
    /// prevents a run from starting.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidUrl(_)
                | Error::UnsupportedScheme(_)
                | Error::InvalidOption(_)
                | Error::UnsupportedOption { .. }
                | Error::InvalidHeaderValue { .. }
                | Error::Tls(_)
        )
    }

    /// Check if this error comes from parsing a response.
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(
            self,
            Error::InvalidStatusLine(_)
                | Error::StatusOutOfRange(_)
                | Error::MissingContentLength
                | Error::InvalidContentLength(_)
                | Error::UnexpectedBody { .. }
                | Error::BodyTooLong { .. }
                | Error::ResponseTooLarge { .. }
                | Error::InvalidHandshake(_)
                | Error::InvalidFrame(_)
                | Error::ReservedOpcode(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Http(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Failure of a single request, recorded in the error tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The server answered with a status code >= 400.
    Status(u16),
    /// Connecting, writing or reading failed.
    Transport(String),
    /// The per-request timeout elapsed.
    Timeout,
    /// The response could not be parsed.
    Parse(String),
    /// A content inspector flagged the response with its own code.
    Custom(String),
}

impl RequestError {
    /// Key under which this failure is counted in the error tally.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            RequestError::Status(status) => status.to_string(),
            RequestError::Transport(_) | RequestError::Parse(_) => TRANSPORT_ERROR_CODE.to_string(),
            RequestError::Timeout => TIMEOUT_ERROR_CODE.to_string(),
            RequestError::Custom(code) => code.clone(),
        }
    }

    /// Check if this failure happened below the HTTP layer.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, RequestError::Transport(_) | RequestError::Timeout)
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Status(status) => write!(f, "HTTP status {}", status),
            RequestError::Transport(msg) => write!(f, "transport error: {}", msg),
            RequestError::Timeout => write!(f, "request timed out"),
            RequestError::Parse(msg) => write!(f, "parse error: {}", msg),
            RequestError::Custom(code) => write!(f, "custom error: {}", code),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<Error> for RequestError {
    fn from(err: Error) -> Self {
        match err {
            Error::Timeout => RequestError::Timeout,
            e if e.is_parse() => RequestError::Parse(e.to_string()),
            e => RequestError::Transport(e.to_string()),
        }
    }
}
