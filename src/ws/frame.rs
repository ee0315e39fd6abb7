//! WebSocket frame encoding and decoding (RFC 6455).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (client frames only)              |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest payload accepted in a single frame.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text.
    Text = 0x1,
    /// Arbitrary binary data.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Keepalive request; answered with a pong.
    Ping = 0x9,
    /// Keepalive response.
    Pong = 0xA,
}

impl OpCode {
    /// Decode the low nibble of the first frame byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedOpcode`] for the reserved values.
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte & 0x0F {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::ReservedOpcode(other)),
        }
    }

    /// Check if this is a control opcode.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// XOR `data` with the repeating 4-byte `mask`.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ mask_u32;
        chunk.copy_from_slice(&val.to_ne_bytes());
    }
    for (byte, m) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= m;
    }
}

/// One WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a final frame.
    #[must_use]
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a text frame.
    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Text, data)
    }

    /// Create a pong frame echoing a ping payload.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, data)
    }

    /// Create a close frame with an optional status code.
    #[must_use]
    pub fn close(code: Option<u16>) -> Self {
        let payload = code.map(|c| Bytes::copy_from_slice(&c.to_be_bytes())).unwrap_or_default();
        Self::new(OpCode::Close, payload)
    }

    /// Parse one frame from the start of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteFrame`] if `buf` does not yet hold the whole frame
    /// - [`Error::ReservedOpcode`] for a reserved opcode
    /// - [`Error::InvalidFrame`] for reserved bits, malformed control frames
    ///   or a payload longer than [`MAX_FRAME_PAYLOAD`]
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }
        let (byte0, byte1) = (buf[0], buf[1]);

        if byte0 & 0x70 != 0 {
            return Err(Error::InvalidFrame("reserved bits set".into()));
        }
        let fin = byte0 & 0x80 != 0;
        let opcode = OpCode::from_u8(byte0)?;
        let masked = byte1 & 0x80 != 0;

        let (payload_len, mut offset) = match byte1 & 0x7F {
            len @ 0..=125 => (usize::from(len), 2),
            126 => {
                let bytes = need(buf, 4)?;
                (usize::from(u16::from_be_bytes([bytes[2], bytes[3]])), 4)
            }
            _ => {
                let bytes = need(buf, 10)?;
                let mut len = [0u8; 8];
                len.copy_from_slice(&bytes[2..10]);
                let len = usize::try_from(u64::from_be_bytes(len))
                    .map_err(|_| Error::InvalidFrame("payload length overflows usize".into()))?;
                (len, 10)
            }
        };

        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(Error::InvalidFrame(format!(
                "frame payload of {} bytes exceeds {}",
                payload_len, MAX_FRAME_PAYLOAD
            )));
        }

        if opcode.is_control() && (!fin || payload_len > MAX_CONTROL_FRAME_PAYLOAD) {
            return Err(Error::InvalidFrame(format!(
                "invalid control frame ({:?}, {} bytes)",
                opcode, payload_len
            )));
        }

        let mask = if masked {
            let bytes = need(buf, offset + 4)?;
            let mask = [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]];
            offset += 4;
            Some(mask)
        } else {
            None
        };

        let total = offset
            .checked_add(payload_len)
            .ok_or_else(|| Error::InvalidFrame("frame too large".into()))?;
        let bytes = need(buf, total)?;

        let mut payload = bytes[offset..total].to_vec();
        if let Some(mask) = mask {
            apply_mask(&mut payload, mask);
        }

        Ok((
            Self {
                fin,
                opcode,
                payload: Bytes::from(payload),
            },
            total,
        ))
    }

    /// Append the wire form of the frame to `buf`, masking with `mask` if given.
    pub fn encode(&self, buf: &mut BytesMut, mask: Option<[u8; 4]>) {
        let len = self.payload.len();
        buf.reserve(14 + len);

        let fin_bit = if self.fin { 0x80 } else { 0 };
        buf.put_u8(fin_bit | self.opcode as u8);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        if len <= 125 {
            buf.put_u8(mask_bit | len as u8);
        } else if let Ok(len) = u16::try_from(len) {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(len);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(len as u64);
        }

        match mask {
            Some(mask) => {
                buf.put_slice(&mask);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], mask);
            }
            None => buf.put_slice(&self.payload),
        }
    }
}

fn need(buf: &[u8], len: usize) -> Result<&[u8]> {
    if buf.len() < len {
        return Err(Error::IncompleteFrame {
            needed: len - buf.len(),
        });
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_u8() {
        assert_eq!(OpCode::from_u8(0x1).unwrap(), OpCode::Text);
        assert_eq!(OpCode::from_u8(0x8).unwrap(), OpCode::Close);
        assert!(matches!(OpCode::from_u8(0x3), Err(Error::ReservedOpcode(0x3))));
        assert!(matches!(OpCode::from_u8(0xB), Err(Error::ReservedOpcode(0xB))));
        assert!(OpCode::Ping.is_control());
        assert!(!OpCode::Binary.is_control());
    }

    #[test]
    fn test_apply_mask_twice_restores() {
        let original = b"Hello, WebSocket!".to_vec();
        let mut data = original.clone();
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        apply_mask(&mut data, mask);
        assert_ne!(data, original);
        apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn test_parse_rfc_masked_hello() {
        // RFC 6455 section 5.7: single-frame masked text "Hello".
        let data = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (frame, consumed) = Frame::parse(&data).unwrap();
        assert_eq!(consumed, data.len());
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[test]
    fn test_parse_unmasked_server_frame() {
        let data = [0x81, 0x05, b'H', b'e', b'l', b'l', b'o'];
        let (frame, consumed) = Frame::parse(&data).unwrap();
        assert_eq!(consumed, 7);
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(matches!(
            Frame::parse(&[0x81]),
            Err(Error::IncompleteFrame { needed: 1 })
        ));
        assert!(matches!(
            Frame::parse(&[0x81, 0x05, b'H']),
            Err(Error::IncompleteFrame { needed: 4 })
        ));
        assert!(matches!(
            Frame::parse(&[0x82, 126, 0x01]),
            Err(Error::IncompleteFrame { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_oversized_length_before_payload_arrives() {
        assert!(matches!(
            Frame::parse(&[0x81, 127, 0, 0, 1, 0, 0, 0, 0, 0]),
            Err(Error::InvalidFrame(_))
        ));

        let mut header = vec![0x82, 127];
        header.extend_from_slice(&(MAX_FRAME_PAYLOAD as u64 + 1).to_be_bytes());
        assert!(matches!(Frame::parse(&header), Err(Error::InvalidFrame(_))));

        header.truncate(2);
        header.extend_from_slice(&(MAX_FRAME_PAYLOAD as u64).to_be_bytes());
        assert!(matches!(Frame::parse(&header), Err(Error::IncompleteFrame { .. })));
    }

    #[test]
    fn test_parse_rejects_reserved_bits() {
        assert!(matches!(
            Frame::parse(&[0xC1, 0x00]),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_parse_rejects_fragmented_ping() {
        assert!(matches!(
            Frame::parse(&[0x09, 0x00]),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_encode_masked_matches_rfc() {
        let mut buf = BytesMut::new();
        Frame::text("Hello").encode(&mut buf, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            &buf[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_encode_extended_lengths() {
        let mut buf = BytesMut::new();
        Frame::new(OpCode::Binary, vec![0u8; 300]).encode(&mut buf, None);
        assert_eq!(buf[1], 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 300);

        let mut buf = BytesMut::new();
        Frame::new(OpCode::Binary, vec![0u8; 70_000]).encode(&mut buf, Some([1, 2, 3, 4]));
        assert_eq!(buf[1], 0x80 | 127);
        let (frame, consumed) = Frame::parse(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(frame.payload.len(), 70_000);
        assert!(frame.payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_close_frame_payload() {
        let frame = Frame::close(Some(1000));
        assert_eq!(&frame.payload[..], &[0x03, 0xE8]);
        assert!(Frame::close(None).payload.is_empty());
    }
}
