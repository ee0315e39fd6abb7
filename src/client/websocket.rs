//! WebSocket client: one full-duplex connection per virtual user.
//!
//! WebSocket has no request/response pairing, so each outbound text message
//! is the envelope `{"id": <u64>, "body": <value>}` and the request completes
//! when a text message carrying the same `id` comes back. Anything else
//! received in between is dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Exchange, inspect};
use crate::client::http::substitute;
use crate::context::RunContext;
use crate::error::{Error, RequestError};
use crate::net::{Connector, NetStream};
use crate::stats::RequestId;
use crate::ws::{Frame, Message, WsStream};

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    id: RequestId,
    body: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: Option<RequestId>,
}

#[derive(Debug)]
pub(crate) struct WsClient {
    pub(crate) ctx: Arc<RunContext>,
    connector: Connector,
    stream: Option<WsStream<NetStream>>,
}

impl WsClient {
    pub(crate) fn new(connector: Connector, ctx: Arc<RunContext>) -> Self {
        Self {
            ctx,
            connector,
            stream: None,
        }
    }

    /// Open the connection, logging instead of failing.
    pub(crate) async fn connect(&mut self) {
        if let Err(e) = self.ensure_connected().await {
            tracing::warn!(error = %e, "websocket connect failed");
        }
    }

    async fn ensure_connected(&mut self) -> crate::Result<&mut WsStream<NetStream>> {
        if self.stream.is_none() {
            let io = self.connector.connect().await?;
            let plan = &self.ctx.plan;
            let mut headers = self.ctx.config.headers.clone();
            if let Some(cookie) = self.ctx.config.cookie_header() {
                headers.push(("Cookie".into(), cookie));
            }
            let stream = WsStream::connect(io, &plan.host_header, &plan.path, &headers).await?;
            tracing::debug!(url = %plan.url, "websocket connected");
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }

    pub(crate) fn abandon(&mut self) {
        self.stream = None;
    }

    pub(crate) async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close().await {
                tracing::debug!(error = %e, "websocket close failed");
            }
        }
    }

    fn message(&self, id: RequestId) -> Result<String, RequestError> {
        let config = &self.ctx.config;
        let body = config
            .body
            .as_ref()
            .map(|body| body.to_json(id))
            .unwrap_or(serde_json::Value::Null);
        let text = serde_json::to_string(&Envelope { id, body: &body })
            .map_err(|e| RequestError::Parse(e.to_string()))?;

        match config.index_param.as_deref() {
            Some(token) if config.uses_index() => {
                let value = self.ctx.index_value();
                Ok(String::from_utf8_lossy(&substitute(text.as_bytes(), token, &value)).into_owned())
            }
            _ => Ok(text),
        }
    }

    pub(crate) async fn exchange(&mut self, id: RequestId) -> Exchange {
        let text = match self.message(id) {
            Ok(text) => text,
            Err(error) => return Exchange::failed(error),
        };
        match self.round_trip(id, text).await {
            Ok(exchange) => exchange,
            Err(e) => {
                self.stream = None;
                Exchange::failed(e)
            }
        }
    }

    async fn round_trip(&mut self, id: RequestId, text: String) -> crate::Result<Exchange> {
        let stream = self.ensure_connected().await?;
        stream.send(&Frame::text(text)).await?;

        loop {
            match stream.read_message().await? {
                Message::Text(reply) => {
                    let matched = serde_json::from_str::<Reply>(&reply)
                        .ok()
                        .and_then(|r| r.id)
                        .is_some_and(|reply_id| reply_id == id);
                    if matched {
                        let mut exchange = Exchange::default();
                        inspect(&self.ctx, &mut exchange, reply.as_bytes());
                        return Ok(exchange);
                    }
                    tracing::debug!(id, "dropping unmatched websocket message");
                }
                Message::Ping(payload) => stream.send(&Frame::pong(payload)).await?,
                Message::Pong(_) | Message::Binary(_) => {}
                Message::Close => return Err(Error::ConnectionClosed),
            }
        }
    }
}
