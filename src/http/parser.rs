//! Incremental HTTP/1.1 response parser for raw connections.
//!
//! The parser only answers two questions: has a full response arrived, and
//! what was its status code. It understands `Content-Length` framing and the
//! responses that never carry a body; chunked transfer encoding is rejected.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Maximum size of a response head before the parser gives up.
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Responses at least this long never take the duplicate fast path.
pub const DUPLICATE_SIZE_LIMIT: usize = 1024;

const HEADER_BOUNDARY: &[u8] = b"\r\n\r\n";

/// Parser progress for the current response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Buffering until the blank line that ends the head.
    AwaitingHeaderBoundary,
    /// Head parsed, counting body bytes.
    AwaitingBody,
    /// A full response has arrived.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ShapeKey {
    total_len: usize,
    header_len: usize,
}

#[derive(Debug, Clone, Copy)]
struct ShapeInfo {
    status: u16,
    single_delivery: bool,
}

/// Response shapes seen during a run, shared by every raw connection.
///
/// A shape is the pair (total length, head length). A response arriving in
/// one delivery whose shape and status match a cached single-delivery shape
/// is taken as finished without parsing its head. Entries are never evicted;
/// the cache is bounded by the variety of responses the target produces.
#[derive(Debug, Clone, Default)]
pub struct ShapeCache {
    shapes: Arc<Mutex<HashMap<ShapeKey, ShapeInfo>>>,
}

impl ShapeCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct shapes recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.lock().len()
    }

    /// Check whether no shape has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.lock().is_empty()
    }

    fn get(&self, key: ShapeKey) -> Option<ShapeInfo> {
        self.shapes.lock().get(&key).copied()
    }

    fn insert(&self, key: ShapeKey, info: ShapeInfo) {
        let mut shapes = self.shapes.lock();
        let entry = shapes.entry(key).or_insert(info);
        if entry.status == info.status {
            entry.single_delivery |= info.single_delivery;
        } else {
            *entry = info;
        }
    }
}

/// Restartable per-connection response parser.
///
/// Feed bytes with [`feed`](Self::feed) as they arrive; once it reports
/// [`ParseState::Finished`] the status is available and [`reset`](Self::reset)
/// prepares the parser for the next response on the same connection.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParseState,
    buffer: BytesMut,
    head_request: bool,
    cache: ShapeCache,
    deliveries: usize,
    status: Option<u16>,
    header_len: usize,
    content_length: usize,
    body_received: usize,
    fast_path: bool,
}

impl ResponseParser {
    /// Create a parser for responses to requests with the given method kind.
    #[must_use]
    pub fn new(cache: ShapeCache, head_request: bool) -> Self {
        Self {
            state: ParseState::AwaitingHeaderBoundary,
            buffer: BytesMut::with_capacity(1024),
            head_request,
            cache,
            deliveries: 0,
            status: None,
            header_len: 0,
            content_length: 0,
            body_received: 0,
            fast_path: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ParseState {
        self.state
    }

    /// Check whether a full response has arrived.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == ParseState::Finished
    }

    /// Status code of the current response, once its head has been read.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Check whether the last response was recognized from the shape cache.
    #[must_use]
    pub const fn used_fast_path(&self) -> bool {
        self.fast_path
    }

    /// Prepare for the next response on the same connection.
    pub fn reset(&mut self) {
        self.state = ParseState::AwaitingHeaderBoundary;
        self.buffer.clear();
        self.deliveries = 0;
        self.status = None;
        self.header_len = 0;
        self.content_length = 0;
        self.body_received = 0;
        self.fast_path = false;
    }

    /// Consume the next delivery of bytes.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the status line is malformed or out of range,
    /// a body-carrying response has no `Content-Length`, a bodiless response
    /// carries body bytes, or more bytes arrive than the response announced.
    pub fn feed(&mut self, data: &[u8]) -> Result<ParseState> {
        self.deliveries += 1;
        match self.state {
            ParseState::AwaitingHeaderBoundary => self.feed_head(data),
            ParseState::AwaitingBody => {
                self.body_received += data.len();
                self.check_body()
            }
            ParseState::Finished if data.is_empty() => Ok(ParseState::Finished),
            ParseState::Finished => Err(Error::BodyTooLong {
                expected: self.content_length,
                received: self.content_length + data.len(),
            }),
        }
    }

    fn feed_head(&mut self, data: &[u8]) -> Result<ParseState> {
        let search_from = self.buffer.len().saturating_sub(HEADER_BOUNDARY.len() - 1);
        self.buffer.extend_from_slice(data);

        let Some(pos) = find_boundary(&self.buffer[search_from..]).map(|p| p + search_from) else {
            if self.buffer.len() > MAX_HEADER_SIZE {
                return Err(Error::ResponseTooLarge {
                    size: self.buffer.len(),
                    max: MAX_HEADER_SIZE,
                });
            }
            return Ok(ParseState::AwaitingHeaderBoundary);
        };
        self.header_len = pos + HEADER_BOUNDARY.len();

        let key = ShapeKey {
            total_len: self.buffer.len(),
            header_len: self.header_len,
        };
        if self.try_fast_path(key) {
            return Ok(ParseState::Finished);
        }

        let status = parse_head(&self.buffer[..pos])?;
        self.status = Some(status.code);
        self.body_received = self.buffer.len() - self.header_len;
        self.buffer.clear();

        if self.head_request || !has_body(status.code) {
            if self.body_received > 0 {
                return Err(Error::UnexpectedBody {
                    status: status.code,
                    len: self.body_received,
                });
            }
            self.content_length = 0;
            self.state = ParseState::Finished;
            self.remember_shape();
            return Ok(ParseState::Finished);
        }

        self.content_length = status.content_length.ok_or(Error::MissingContentLength)?;
        self.check_body()
    }

    fn try_fast_path(&mut self, key: ShapeKey) -> bool {
        if self.deliveries != 1 || key.total_len >= DUPLICATE_SIZE_LIMIT {
            return false;
        }
        let Some(info) = self.cache.get(key) else {
            return false;
        };
        if !info.single_delivery || quick_status(&self.buffer) != Some(info.status) {
            return false;
        }
        self.status = Some(info.status);
        self.content_length = key.total_len - key.header_len;
        self.body_received = self.content_length;
        self.state = ParseState::Finished;
        self.fast_path = true;
        self.buffer.clear();
        true
    }

    fn check_body(&mut self) -> Result<ParseState> {
        use std::cmp::Ordering;

        match self.body_received.cmp(&self.content_length) {
            Ordering::Less => {
                self.state = ParseState::AwaitingBody;
                Ok(ParseState::AwaitingBody)
            }
            Ordering::Equal => {
                self.state = ParseState::Finished;
                self.remember_shape();
                Ok(ParseState::Finished)
            }
            Ordering::Greater => Err(Error::BodyTooLong {
                expected: self.content_length,
                received: self.body_received,
            }),
        }
    }

    fn remember_shape(&self) {
        if let Some(status) = self.status {
            self.cache.insert(
                ShapeKey {
                    total_len: self.header_len + self.content_length,
                    header_len: self.header_len,
                },
                ShapeInfo {
                    status,
                    single_delivery: self.deliveries == 1,
                },
            );
        }
    }
}

struct Head {
    code: u16,
    content_length: Option<usize>,
}

fn find_boundary(data: &[u8]) -> Option<usize> {
    data.windows(HEADER_BOUNDARY.len())
        .position(|window| window == HEADER_BOUNDARY)
}

/// Status digits at their fixed offset in `HTTP/1.1 NNN`.
fn quick_status(data: &[u8]) -> Option<u16> {
    let digits = data.get(9..12)?;
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(digits.iter().fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0')))
}

const fn has_body(status: u16) -> bool {
    !matches!(status, 100..=199 | 204 | 304)
}

fn parse_head(head: &[u8]) -> Result<Head> {
    let head = std::str::from_utf8(head)
        .map_err(|_| Error::InvalidStatusLine("response head is not valid UTF-8".into()))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let code = status_line
        .strip_prefix("HTTP/1.1 ")
        .and_then(|rest| rest.split(' ').next())
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::InvalidStatusLine(status_line.to_string()))?;
    if !(100..=599).contains(&code) {
        return Err(Error::StatusOutOfRange(code));
    }

    let mut content_length = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            let length = value
                .parse::<usize>()
                .map_err(|_| Error::InvalidContentLength(value.to_string()))?;
            content_length = Some(length);
        }
    }

    Ok(Head {
        code,
        content_length,
    })
}
