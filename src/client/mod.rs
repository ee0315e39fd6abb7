//! Protocol clients.
//!
//! Every realization implements the same contract: [`Client::start`] prepares
//! the client, [`Client::make_request`] issues exactly one logical request
//! and reports it through the run's shared completion path, and
//! [`Client::stop`] releases its connection. The realization is selected once
//! per run from the URL scheme and [`ClientMode`](crate::ClientMode).

pub(crate) mod http;
mod raw;
mod websocket;

use std::sync::Arc;

use crate::context::{RunContext, Transport};
use crate::error::RequestError;
use crate::stats::RequestId;

use self::http::HttpClient;
use self::raw::RawClient;
use self::websocket::WsClient;

/// Outcome of one completed request, handed to the status callback.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    /// Request identifier.
    pub id: RequestId,
    /// HTTP status, when a response arrived.
    pub status: Option<u16>,
    /// Failure, if any.
    pub error: Option<RequestError>,
    /// Measured latency.
    pub latency_ms: f64,
}

impl RequestOutcome {
    /// Check whether the request succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A response as seen by a content inspector.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    /// HTTP status; `None` for WebSocket messages.
    pub status: Option<u16>,
    /// Response body or message text.
    pub body: &'a [u8],
}

/// Status and failure of one exchange.
#[derive(Debug, Default)]
pub(crate) struct Exchange {
    pub(crate) status: Option<u16>,
    pub(crate) error: Option<RequestError>,
}

impl Exchange {
    pub(crate) fn response(status: u16) -> Self {
        let error = (status >= 400).then_some(RequestError::Status(status));
        Self {
            status: Some(status),
            error,
        }
    }

    pub(crate) fn failed(error: impl Into<RequestError>) -> Self {
        Self {
            status: None,
            error: Some(error.into()),
        }
    }
}

/// Apply a content inspector to a response, if one is configured.
pub(crate) fn inspect(ctx: &RunContext, exchange: &mut Exchange, body: &[u8]) {
    if let Some(inspector) = &ctx.config.content_inspector {
        let view = ResponseView {
            status: exchange.status,
            body,
        };
        if let Some(code) = inspector(&view) {
            exchange.error = Some(RequestError::Custom(code));
        }
    }
}

/// One virtual user.
#[derive(Debug)]
pub(crate) enum Client {
    Http(HttpClient),
    Raw(RawClient),
    WebSocket(WsClient),
}

impl Client {
    pub(crate) fn new(ctx: Arc<RunContext>) -> Self {
        match &ctx.transport {
            Transport::Http(client) => Client::Http(HttpClient::new(client.clone(), Arc::clone(&ctx))),
            Transport::Socket {
                connector,
                request: Some(request),
            } => Client::Raw(RawClient::new(connector.clone(), request.clone(), Arc::clone(&ctx))),
            Transport::Socket {
                connector,
                request: None,
            } => Client::WebSocket(WsClient::new(connector.clone(), Arc::clone(&ctx))),
        }
    }

    fn ctx(&self) -> &Arc<RunContext> {
        match self {
            Client::Http(c) => &c.ctx,
            Client::Raw(c) => &c.ctx,
            Client::WebSocket(c) => &c.ctx,
        }
    }

    /// Prepare the client. A no-op once the run has stopped.
    pub(crate) async fn start(&mut self) {
        if !self.ctx().is_running() {
            return;
        }
        if let Client::WebSocket(c) = self {
            c.connect().await;
        }
    }

    /// Release connection resources.
    pub(crate) async fn stop(&mut self) {
        match self {
            Client::Http(_) => {}
            Client::Raw(c) => c.disconnect(),
            Client::WebSocket(c) => c.disconnect().await,
        }
    }

    /// Issue one request and report it through the completion path.
    pub(crate) async fn make_request(&mut self) {
        let ctx = Arc::clone(self.ctx());
        if !ctx.is_running() {
            return;
        }
        let id = ctx.begin();

        let exchange = match ctx.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.exchange(id)).await {
                Ok(exchange) => exchange,
                Err(_) => {
                    self.abandon();
                    Exchange::failed(RequestError::Timeout)
                }
            },
            None => self.exchange(id).await,
        };

        ctx.complete(id, exchange.status, exchange.error);
    }

    async fn exchange(&mut self, id: RequestId) -> Exchange {
        match self {
            Client::Http(c) => c.exchange(id).await,
            Client::Raw(c) => c.exchange().await,
            Client::WebSocket(c) => c.exchange(id).await,
        }
    }

    /// Drop a connection left mid-response by a timeout.
    fn abandon(&mut self) {
        match self {
            Client::Http(_) => {}
            Client::Raw(c) => c.disconnect(),
            Client::WebSocket(c) => c.abandon(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_response_status() {
        let ok = Exchange::response(204);
        assert_eq!(ok.status, Some(204));
        assert!(ok.error.is_none());

        let failed = Exchange::response(404);
        assert_eq!(failed.error, Some(RequestError::Status(404)));
    }

    #[test]
    fn test_inspector_overrides_error() {
        let config = crate::Config::new("http://127.0.0.1:1/").with_content_inspector(Arc::new(
            |view: &ResponseView<'_>| (view.body != b"ok").then(|| "bad-body".to_string()),
        ));
        let ctx = RunContext::new(config).unwrap();

        let mut exchange = Exchange::response(200);
        inspect(&ctx, &mut exchange, b"ok");
        assert!(exchange.error.is_none());

        inspect(&ctx, &mut exchange, b"nope");
        assert_eq!(exchange.error, Some(RequestError::Custom("bad-body".into())));
    }
}
