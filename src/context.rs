//! State shared by every client and timer of one run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::client::RequestOutcome;
use crate::config::{ClientKind, Config, Plan};
use crate::error::{RequestError, Result};
use crate::http::{ShapeCache, build_request};
use crate::net::Connector;
use crate::stats::{LatencyTracker, LoadResult, PartialReport, RequestId};

/// How clients of this run reach the target.
#[derive(Debug, Clone)]
pub(crate) enum Transport {
    /// Shared library client.
    Http(reqwest::Client),
    /// Raw sockets, with the pre-built request bytes for raw HTTP.
    Socket {
        connector: Connector,
        request: Option<Bytes>,
    },
}

/// Run-wide state: configuration, tracker, stop flag and index counter.
pub(crate) struct RunContext {
    pub(crate) config: Config,
    pub(crate) plan: Plan,
    pub(crate) transport: Transport,
    pub(crate) shapes: ShapeCache,
    tracker: Mutex<LatencyTracker>,
    running: AtomicBool,
    finished: Notify,
    next_index: AtomicU64,
}

impl RunContext {
    /// Validate `config` and prepare everything a client needs.
    pub(crate) fn new(config: Config) -> Result<Arc<Self>> {
        let plan = config.resolve()?;
        let transport = match plan.kind {
            ClientKind::Http => Transport::Http(crate::client::http::build_client(&config)?),
            ClientKind::RawSocket => Transport::Socket {
                connector: Connector::new(&plan, &config.tls)?,
                request: Some(build_request(&config, &plan)?),
            },
            ClientKind::WebSocket => Transport::Socket {
                connector: Connector::new(&plan, &config.tls)?,
                request: None,
            },
        };
        let tracker = LatencyTracker::new(config.max_requests, config.max_seconds);

        Ok(Arc::new(Self {
            config,
            plan,
            transport,
            shapes: ShapeCache::new(),
            tracker: Mutex::new(tracker),
            running: AtomicBool::new(false),
            finished: Notify::new(),
            next_index: AtomicU64::new(0),
        }))
    }

    pub(crate) fn start(&self) {
        self.tracker.lock().start();
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Check whether no further request should be issued.
    pub(crate) fn should_stop(&self) -> bool {
        !self.is_running() || self.tracker.lock().should_stop()
    }

    /// Request a stop as soon as convenient and wake the orchestrator.
    pub(crate) fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.finished.notify_one();
        }
    }

    /// Wait until [`stop`](Self::stop) has been called.
    pub(crate) async fn finished(&self) {
        self.finished.notified().await;
    }

    pub(crate) fn begin(&self) -> RequestId {
        self.tracker.lock().begin(None)
    }

    /// Next value for the index token.
    pub(crate) fn index_value(&self) -> String {
        match &self.config.index_param_callback {
            Some(callback) => callback(),
            None => self.next_index.fetch_add(1, Ordering::Relaxed).to_string(),
        }
    }

    /// Shared completion path for successes and failures alike.
    ///
    /// Updates the tracker, runs the status callback, then stops the run if
    /// the stop condition is met or a transport error occurred with
    /// recovery disabled.
    pub(crate) fn complete(&self, id: RequestId, status: Option<u16>, error: Option<RequestError>) {
        let code = error.as_ref().map(RequestError::code);
        let (latency_ms, done) = {
            let mut tracker = self.tracker.lock();
            let latency = tracker.end(id, code.as_deref());
            (latency, !tracker.is_running())
        };

        let Some(latency_ms) = latency_ms else {
            tracing::debug!(id, "completion after finish dropped");
            return;
        };

        let transport_failure = error.as_ref().is_some_and(RequestError::is_transport);
        if let Some(error) = &error {
            tracing::debug!(id, code = code.as_deref().unwrap_or_default(), %error, "request failed");
        }

        if let Some(callback) = &self.config.status_callback {
            callback(&RequestOutcome {
                id,
                status,
                error,
                latency_ms,
            });
        }

        if done {
            self.stop();
        } else if transport_failure && !self.config.recover {
            tracing::warn!(id, "transport error with recovery disabled, stopping");
            self.stop();
        }
    }

    pub(crate) fn show_partial(&self) -> PartialReport {
        self.tracker.lock().show_partial()
    }

    /// Finalize the tracker and return the result.
    pub(crate) fn finish(&self) -> LoadResult {
        let mut tracker = self.tracker.lock();
        tracker.finish();
        tracker.result()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("plan", &self.plan)
            .field("running", &self.is_running())
            .field("tracker", &*self.tracker.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn context(config: Config) -> Arc<RunContext> {
        let ctx = RunContext::new(config).unwrap();
        ctx.start();
        ctx
    }

    #[tokio::test]
    async fn test_complete_stops_at_max_requests() {
        let ctx = context(Config::new("http://127.0.0.1:1/").with_max_requests(2));
        for _ in 0..2 {
            let id = ctx.begin();
            ctx.complete(id, Some(200), None);
        }
        assert!(!ctx.is_running());
        assert!(ctx.should_stop());
        ctx.finished().await;
        assert_eq!(ctx.finish().total_requests, 2);
    }

    #[tokio::test]
    async fn test_status_callback_sees_every_completion() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let ctx = context(
            Config::new("http://127.0.0.1:1/").with_status_callback(Arc::new(move |outcome: &RequestOutcome| {
                assert_eq!(outcome.status, Some(503));
                assert_eq!(outcome.error, Some(RequestError::Status(503)));
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        for _ in 0..3 {
            let id = ctx.begin();
            ctx.complete(id, Some(503), Some(RequestError::Status(503)));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.finish().error_codes.get("503"), Some(&3));
    }

    #[tokio::test]
    async fn test_transport_error_without_recover_stops() {
        let ctx = context(Config::new("http://127.0.0.1:1/").with_recover(false));
        let id = ctx.begin();
        ctx.complete(id, None, Some(RequestError::Transport("refused".into())));
        assert!(!ctx.is_running());
        assert_eq!(ctx.finish().error_codes.get("-1"), Some(&1));
    }

    #[tokio::test]
    async fn test_transport_error_with_recover_continues() {
        let ctx = context(Config::new("http://127.0.0.1:1/"));
        let id = ctx.begin();
        ctx.complete(id, None, Some(RequestError::Transport("refused".into())));
        assert!(ctx.is_running());
    }

    #[tokio::test]
    async fn test_index_values_are_sequential() {
        let ctx = context(Config::new("http://127.0.0.1:1/?i=IDX").with_index_param("IDX"));
        assert_eq!(ctx.index_value(), "0");
        assert_eq!(ctx.index_value(), "1");
    }

    #[tokio::test]
    async fn test_index_callback() {
        let ctx = context(
            Config::new("http://127.0.0.1:1/?i=IDX")
                .with_index_param("IDX")
                .with_index_param_callback(Arc::new(|| "custom".to_string())),
        );
        assert_eq!(ctx.index_value(), "custom");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(RunContext::new(Config::new("gopher://x/")).is_err());
    }
}
