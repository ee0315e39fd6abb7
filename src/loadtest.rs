//! Run orchestration.

use std::sync::Arc;

use crate::config::Config;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::pool::ClientPool;
use crate::stats::LoadResult;
use crate::timer::DriftCorrectingTimer;

/// Lifecycle of a [`LoadTest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Configured, not started.
    Idle,
    /// Dispatching requests.
    Running,
    /// Finished; the result has been produced.
    Stopped,
}

/// Requests a stop of a running load test from any task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    ctx: Arc<RunContext>,
}

impl StopHandle {
    /// Stop dispatching as soon as convenient.
    ///
    /// In-flight requests are not aborted synchronously; they are discarded
    /// when the pool shuts down. Has no effect before the run starts.
    pub fn stop(&self) {
        self.ctx.stop();
    }
}

/// One load-test run: tracker, client pool and timers wired together.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use rsload::{Config, LoadTest};
///
/// # async fn demo() -> rsload::Result<()> {
/// let config = Config::new("http://localhost:8080/")
///     .with_concurrency(20)
///     .with_max_seconds(Duration::from_secs(10));
/// let result = LoadTest::new(config)?.run().await?;
/// println!("{:.0} rps, p99 {:?} ms", result.requests_per_second, result.percentiles.p99);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LoadTest {
    ctx: Arc<RunContext>,
    state: RunState,
}

impl LoadTest {
    /// Validate `config` and prepare the run.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the options are invalid or
    /// meaningless together. No traffic is sent before this succeeds.
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            ctx: RunContext::new(config)?,
            state: RunState::Idle,
        })
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Handle for stopping the run from elsewhere.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Drive the run to completion and return its result.
    ///
    /// The run ends when the request budget is spent, the time budget
    /// elapses, a transport error occurs with recovery disabled, or a
    /// [`StopHandle`] is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the test has already run.
    pub async fn run(&mut self) -> Result<LoadResult> {
        if self.state != RunState::Idle {
            return Err(Error::InvalidOption("a load test can only run once".into()));
        }
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config;

        self.state = RunState::Running;
        ctx.start();
        tracing::info!(
            url = %ctx.plan.url,
            client = %ctx.plan.kind,
            concurrency = config.concurrency,
            rate = ?config.requests_per_second,
            max_requests = ?config.max_requests,
            max_seconds = ?config.max_seconds,
            "load test started"
        );
        if ctx.should_stop() {
            tracing::debug!("stop condition met before the first request");
            ctx.stop();
        }

        let mut reporter = match config.report_interval {
            Some(interval) if !config.quiet => Some(self.start_reporter(interval)?),
            _ => None,
        };

        let mut pool = ClientPool::new(Arc::clone(&ctx));
        if let Err(e) = pool.start() {
            ctx.stop();
            self.state = RunState::Stopped;
            return Err(e);
        }

        match config.max_seconds {
            Some(limit) => {
                tokio::select! {
                    () = ctx.finished() => {}
                    () = tokio::time::sleep(limit) => {
                        tracing::debug!("time budget elapsed");
                    }
                }
            }
            None => ctx.finished().await,
        }

        ctx.stop();
        pool.stop().await;
        if let Some(reporter) = reporter.as_mut() {
            reporter.stop().await;
        }

        let result = ctx.finish();
        self.state = RunState::Stopped;
        tracing::info!(
            requests = result.total_requests,
            errors = result.total_errors,
            seconds = format_args!("{:.2}", result.total_time_seconds),
            rps = format_args!("{:.1}", result.requests_per_second),
            mean_latency_ms = format_args!("{:.1}", result.mean_latency_ms),
            "load test finished"
        );
        Ok(result)
    }

    fn start_reporter(&self, interval: std::time::Duration) -> Result<DriftCorrectingTimer> {
        let ctx = Arc::clone(&self.ctx);
        let mut first = true;
        let timer = DriftCorrectingTimer::start(interval, move || {
            if std::mem::take(&mut first) {
                return;
            }
            ctx.show_partial();
        })?;
        Ok(timer.background())
    }
}

/// Run a load test with `config` to completion.
///
/// # Errors
///
/// Returns a configuration error if `config` is invalid.
pub async fn run(config: Config) -> Result<LoadResult> {
    LoadTest::new(config)?.run().await
}
