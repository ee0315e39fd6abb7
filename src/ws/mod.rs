//! Minimal client-side WebSocket protocol (RFC 6455).

mod codec;
mod frame;
mod handshake;

pub use codec::{MAX_HANDSHAKE_SIZE, MAX_MESSAGE_SIZE, Message, WsStream};
pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD, MAX_FRAME_PAYLOAD, OpCode, apply_mask};
pub use handshake::{HandshakeRequest, WS_GUID, compute_accept_key, generate_key, verify_response};
