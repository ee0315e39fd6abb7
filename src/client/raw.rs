//! Raw-socket HTTP/1.1 client.
//!
//! Writes the pre-built request bytes straight to the socket and feeds
//! whatever comes back to a [`ResponseParser`]. One request is in flight per
//! connection; the parser reaching [`ParseState::Finished`] is the only
//! signal that the connection is ready for the next write.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use reqwest::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::Exchange;
use crate::context::RunContext;
use crate::error::{Error, RequestError};
use crate::http::{ParseState, ResponseParser};
use crate::net::{Connector, NetStream};

#[derive(Debug)]
pub(crate) struct RawClient {
    pub(crate) ctx: Arc<RunContext>,
    connector: Connector,
    request: Bytes,
    stream: Option<NetStream>,
    parser: ResponseParser,
    read_buf: BytesMut,
}

/// Result of one write-and-read cycle.
enum Attempt {
    Done(Exchange),
    /// A reused connection was closed by the peer before answering.
    Stale,
}

impl RawClient {
    pub(crate) fn new(connector: Connector, request: Bytes, ctx: Arc<RunContext>) -> Self {
        let parser = ResponseParser::new(ctx.shapes.clone(), ctx.config.method == Method::HEAD);
        Self {
            ctx,
            connector,
            request,
            stream: None,
            parser,
            read_buf: BytesMut::with_capacity(8192),
        }
    }

    pub(crate) fn disconnect(&mut self) {
        self.stream = None;
    }

    pub(crate) async fn exchange(&mut self) -> Exchange {
        match self.attempt().await {
            Attempt::Done(exchange) => exchange,
            Attempt::Stale => {
                tracing::debug!("connection closed between requests, reconnecting");
                match self.attempt().await {
                    Attempt::Done(exchange) => exchange,
                    Attempt::Stale => Exchange::failed(Error::ConnectionClosed),
                }
            }
        }
    }

    async fn attempt(&mut self) -> Attempt {
        let reused = self.stream.is_some();
        if !reused {
            match self.connector.connect().await {
                Ok(stream) => self.stream = Some(stream),
                Err(e) => return Attempt::Done(Exchange::failed(e)),
            }
        }
        let Some(stream) = self.stream.as_mut() else {
            return Attempt::Done(Exchange::failed(Error::ConnectionClosed));
        };

        if let Err(e) = stream.write_all(&self.request).await {
            self.stream = None;
            if reused {
                return Attempt::Stale;
            }
            return Attempt::Done(Exchange::failed(Error::from(e)));
        }

        self.parser.reset();
        let mut received = 0usize;
        loop {
            self.read_buf.clear();
            let n = match stream.read_buf(&mut self.read_buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.stream = None;
                    if reused && received == 0 {
                        return Attempt::Stale;
                    }
                    return Attempt::Done(Exchange::failed(Error::from(e)));
                }
            };
            if n == 0 {
                self.stream = None;
                if reused && received == 0 {
                    return Attempt::Stale;
                }
                return Attempt::Done(Exchange::failed(Error::ConnectionClosed));
            }
            received += n;

            match self.parser.feed(&self.read_buf) {
                Ok(ParseState::Finished) => break,
                Ok(_) => {}
                Err(e) => {
                    self.stream = None;
                    return Attempt::Done(Exchange::failed(RequestError::from(e)));
                }
            }
        }

        if !self.ctx.config.keep_alive {
            self.stream = None;
        }
        match self.parser.status() {
            Some(status) => Attempt::Done(Exchange::response(status)),
            None => Attempt::Done(Exchange::failed(Error::InvalidStatusLine(
                "response finished without status".into(),
            ))),
        }
    }
}
