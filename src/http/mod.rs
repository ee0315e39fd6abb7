//! Minimal HTTP/1.1 framing for the raw-socket client.

mod parser;
mod request;

pub use parser::{DUPLICATE_SIZE_LIMIT, MAX_HEADER_SIZE, ParseState, ResponseParser, ShapeCache};
pub use request::{USER_AGENT, build_request};
