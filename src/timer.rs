//! Periodic callbacks that correct for scheduler drift.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Runs a callback immediately and then at a fixed cadence.
///
/// Each wait is shortened by the drift accumulated so far, so the long-run
/// firing rate converges on the target even when individual wake-ups are
/// late. When the timer falls a whole period behind it re-fires after a
/// single yield instead of sleeping.
///
/// The timer stops when dropped.
#[derive(Debug)]
pub struct DriftCorrectingTimer {
    period: Duration,
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    background: bool,
}

impl DriftCorrectingTimer {
    /// Start a timer with the given period.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the period is zero.
    pub fn start<F>(period: Duration, callback: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(Error::InvalidOption("timer period must be positive".into()));
        }
        let active = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(run(period, Arc::clone(&active), callback));
        Ok(Self {
            period,
            active,
            handle: Some(handle),
            background: false,
        })
    }

    /// Start a timer firing `rate` times per second.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if `rate` is not a positive number
    /// or its period is not representable as a non-zero [`Duration`].
    pub fn with_rate<F>(rate: f64, callback: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        Self::start(period_for_rate(rate)?, callback)
    }

    /// Mark the timer as background work.
    ///
    /// Stopping a background timer does not wait for its task to wind down,
    /// so it never holds up the end of a run.
    #[must_use]
    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    /// Target period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Check whether the timer still fires.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop the timer. No callback starts after this returns.
    ///
    /// Foreground timers are joined, so a callback running concurrently on
    /// another worker has finished by then. Calling `stop` again is a no-op.
    pub async fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        handle.abort();
        if !self.background {
            let _ = handle.await;
        }
    }
}

impl Drop for DriftCorrectingTimer {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Period between firings at `rate` per second.
///
/// # Errors
///
/// Returns [`Error::InvalidOption`] if `rate` is not a positive number or
/// the period overflows or rounds to zero.
pub fn period_for_rate(rate: f64) -> Result<Duration> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(Error::InvalidOption(format!("invalid timer rate: {}", rate)));
    }
    match Duration::try_from_secs_f64(1.0 / rate) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(Error::InvalidOption(format!(
            "timer rate {} has no representable period",
            rate
        ))),
    }
}

async fn run<F>(period: Duration, active: Arc<AtomicBool>, mut callback: F)
where
    F: FnMut(),
{
    let started = Instant::now();
    let mut count: u64 = 0;

    loop {
        if !active.load(Ordering::Acquire) {
            return;
        }
        count += 1;
        callback();

        let elapsed = started.elapsed();
        match next_wait(period, count, elapsed) {
            Some(wait) => tokio::time::sleep(wait).await,
            None => tokio::task::yield_now().await,
        }
    }
}

/// Time to sleep after the `count`-th firing, or `None` when behind schedule.
fn next_wait(period: Duration, count: u64, elapsed: Duration) -> Option<Duration> {
    let scheduled_ns = period.as_nanos().saturating_mul(u128::from(count - 1));
    let drift_ns = elapsed.as_nanos().saturating_sub(scheduled_ns);
    let wait_ns = period.as_nanos().checked_sub(drift_ns)?;
    match u64::try_from(wait_ns) {
        Ok(0) => None,
        Ok(ns) => Some(Duration::from_nanos(ns)),
        Err(_) => Some(period),
    }
}
