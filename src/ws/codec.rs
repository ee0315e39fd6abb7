//! Client-side WebSocket stream over any async byte stream.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame::{Frame, OpCode};
use super::handshake::{HandshakeRequest, generate_key, verify_response};
use crate::error::{Error, Result};

/// Largest handshake response head accepted.
pub const MAX_HANDSHAKE_SIZE: usize = 8192;

/// Largest reassembled message accepted.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A complete message read from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
    /// Ping with its payload.
    Ping(Bytes),
    /// Pong with its payload.
    Pong(Bytes),
    /// Close frame.
    Close,
}

fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}

/// An open client WebSocket connection.
///
/// Outgoing frames are masked; fragmented incoming messages are reassembled.
#[derive(Debug)]
pub struct WsStream<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    mask_counter: u32,
    fragments: Option<(OpCode, BytesMut)>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> WsStream<T> {
    /// Perform the opening handshake over `io`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the server rejects the upgrade
    /// or answers with an invalid response, and an I/O error if the
    /// connection fails.
    pub async fn connect(
        mut io: T,
        host: &str,
        path: &str,
        headers: &[(String, String)],
    ) -> Result<Self> {
        let key = generate_key()?;
        let request = HandshakeRequest {
            host,
            path,
            key: &key,
            headers,
        };
        io.write_all(&request.to_bytes()).await?;
        io.flush().await?;

        let mut read_buf = BytesMut::with_capacity(4096);
        let head_len = loop {
            if let Some(pos) = read_buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            if read_buf.len() > MAX_HANDSHAKE_SIZE {
                return Err(Error::InvalidHandshake(format!(
                    "response head exceeds {} bytes",
                    MAX_HANDSHAKE_SIZE
                )));
            }
            if io.read_buf(&mut read_buf).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        };
        verify_response(&read_buf[..head_len - 2], &key)?;
        read_buf.advance(head_len);

        Ok(Self {
            io,
            read_buf,
            write_buf: BytesMut::with_capacity(1024),
            mask_counter: random_mask_seed(),
            fragments: None,
        })
    }

    fn generate_mask(&mut self) -> [u8; 4] {
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let a = self.mask_counter;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        c.wrapping_mul(0xC2B2_AE35).to_le_bytes()
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match Frame::parse(&self.read_buf) {
                Ok((frame, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(frame);
                }
                Err(Error::IncompleteFrame { .. }) => {}
                Err(e) => return Err(e),
            }
            if self.io.read_buf(&mut self.read_buf).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Read the next complete message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] on EOF, [`Error::InvalidFrame`]
    /// for protocol violations and an I/O error if reading fails.
    pub async fn read_message(&mut self) -> Result<Message> {
        loop {
            let frame = self.read_frame().await?;
            match frame.opcode {
                OpCode::Ping => return Ok(Message::Ping(frame.payload)),
                OpCode::Pong => return Ok(Message::Pong(frame.payload)),
                OpCode::Close => return Ok(Message::Close),
                OpCode::Text | OpCode::Binary if frame.fin => {
                    if self.fragments.is_some() {
                        return Err(Error::InvalidFrame("new message inside fragmented message".into()));
                    }
                    return into_message(frame.opcode, frame.payload);
                }
                OpCode::Text | OpCode::Binary => {
                    if self.fragments.is_some() {
                        return Err(Error::InvalidFrame("new message inside fragmented message".into()));
                    }
                    check_message_size(frame.payload.len())?;
                    self.fragments = Some((frame.opcode, BytesMut::from(&frame.payload[..])));
                }
                OpCode::Continuation => {
                    let Some((opcode, mut data)) = self.fragments.take() else {
                        return Err(Error::InvalidFrame("unexpected continuation frame".into()));
                    };
                    check_message_size(data.len() + frame.payload.len())?;
                    data.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return into_message(opcode, data.freeze());
                    }
                    self.fragments = Some((opcode, data));
                }
            }
        }
    }

    /// Send one masked frame.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if writing fails.
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let mask = self.generate_mask();
        self.write_buf.clear();
        frame.encode(&mut self.write_buf, Some(mask));
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Send a normal-closure frame and shut the stream down.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if writing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.send(&Frame::close(Some(1000))).await?;
        self.io.shutdown().await?;
        Ok(())
    }
}

fn check_message_size(len: usize) -> Result<()> {
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidFrame(format!("message exceeds {} bytes", MAX_MESSAGE_SIZE)));
    }
    Ok(())
}

fn into_message(opcode: OpCode, payload: Bytes) -> Result<Message> {
    if opcode == OpCode::Text {
        let text = String::from_utf8(payload.to_vec())
            .map_err(|_| Error::InvalidFrame("text message is not valid UTF-8".into()))?;
        Ok(Message::Text(text))
    } else {
        Ok(Message::Binary(payload))
    }
}
