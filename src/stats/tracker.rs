//! In-flight request tracking and latency aggregation.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::result::{LoadResult, PartialReport, Percentiles};

/// Identifier of one logical request.
pub type RequestId = u64;

/// Invoked exactly once with the final result when the stop condition is met.
pub type CompletionCallback = Box<dyn FnOnce(&LoadResult) + Send>;

/// Owns the in-flight set, the latency histogram, the error tally and the
/// stop condition of one run.
///
/// Latencies are measured with [`Instant`] and bucketed by rounded
/// millisecond, so percentile computation is bounded by the observed
/// latency range rather than by the request count.
pub struct LatencyTracker {
    in_flight: HashMap<RequestId, Instant>,
    next_id: RequestId,

    histogram: BTreeMap<u64, u64>,
    error_codes: BTreeMap<String, u64>,
    total_requests: u64,
    total_errors: u64,
    total_time_ms: f64,
    min_ms: f64,
    max_ms: f64,

    partial_requests: u64,
    partial_time_ms: f64,
    partial_started: Instant,

    max_requests: Option<u64>,
    max_seconds: Option<Duration>,

    running: bool,
    started: Option<Instant>,
    finished: Option<Instant>,
    on_complete: Option<CompletionCallback>,
}

impl LatencyTracker {
    /// Create a tracker with the given stop condition.
    #[must_use]
    pub fn new(max_requests: Option<u64>, max_seconds: Option<Duration>) -> Self {
        Self {
            in_flight: HashMap::new(),
            next_id: 0,
            histogram: BTreeMap::new(),
            error_codes: BTreeMap::new(),
            total_requests: 0,
            total_errors: 0,
            total_time_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            partial_requests: 0,
            partial_time_ms: 0.0,
            partial_started: Instant::now(),
            max_requests,
            max_seconds,
            running: false,
            started: None,
            finished: None,
            on_complete: None,
        }
    }

    /// Register a callback run once with the final result.
    ///
    /// The callback runs inside [`end`](Self::end) or [`finish`](Self::finish)
    /// while the tracker is borrowed, so it must not call back into it.
    #[must_use]
    pub fn with_completion(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Mark the start of the run.
    pub fn start(&mut self) {
        let now = Instant::now();
        self.running = true;
        self.started = Some(now);
        self.finished = None;
        self.partial_started = now;
    }

    /// Check whether the run is still accepting completions.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Number of requests begun but not yet ended.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Record the start of a request, generating an id if none is given.
    ///
    /// Generated ids skip every id still in flight, so callers may mix
    /// explicit and generated ids. Beginning an explicit id that is already
    /// in flight restarts its clock.
    pub fn begin(&mut self, id: Option<RequestId>) -> RequestId {
        let id = id.unwrap_or_else(|| {
            while self.in_flight.contains_key(&self.next_id) {
                self.next_id = self.next_id.wrapping_add(1);
            }
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            id
        });
        self.in_flight.insert(id, Instant::now());
        id
    }

    /// Record the end of a request.
    ///
    /// Returns the elapsed milliseconds, or `None` if `id` is not in flight
    /// or the run has finished. A call that satisfies the stop condition
    /// finalizes the run before returning.
    pub fn end(&mut self, id: RequestId, error_code: Option<&str>) -> Option<f64> {
        if !self.running {
            return None;
        }
        let begun = self.in_flight.remove(&id)?;
        let elapsed_ms = begun.elapsed().as_secs_f64() * 1000.0;

        self.record(elapsed_ms, error_code);

        if self.should_stop() {
            self.finish();
        }
        Some(elapsed_ms)
    }

    fn record(&mut self, elapsed_ms: f64, error_code: Option<&str>) {
        let bucket = elapsed_ms.round() as u64;
        *self.histogram.entry(bucket).or_insert(0) += 1;

        if let Some(code) = error_code {
            self.total_errors += 1;
            *self.error_codes.entry(code.to_string()).or_insert(0) += 1;
        }

        self.total_requests += 1;
        self.total_time_ms += elapsed_ms;
        self.min_ms = self.min_ms.min(elapsed_ms);
        self.max_ms = self.max_ms.max(elapsed_ms);

        self.partial_requests += 1;
        self.partial_time_ms += elapsed_ms;
    }

    /// Check the stop condition without ending a request.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        if self.max_requests.is_some_and(|max| self.total_requests >= max) {
            return true;
        }
        match (self.max_seconds, self.started) {
            (Some(max), Some(started)) => started.elapsed() >= max,
            _ => false,
        }
    }

    /// Finalize the run if it is still running.
    ///
    /// Returns `true` if this call performed the transition. The completion
    /// callback runs on that call only.
    pub fn finish(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        self.finished = Some(Instant::now());

        if let Some(callback) = self.on_complete.take() {
            let result = self.result();
            callback(&result);
        }
        true
    }

    /// Report and reset the progress accumulated since the previous report.
    pub fn show_partial(&mut self) -> PartialReport {
        let now = Instant::now();
        let interval = now.duration_since(self.partial_started).as_secs_f64();

        let report = PartialReport {
            requests: self.partial_requests,
            mean_latency_ms: mean(self.partial_time_ms, self.partial_requests),
            requests_per_second: rate(self.partial_requests, interval),
            interval_seconds: interval,
            total_requests: self.total_requests,
        };

        tracing::info!(
            requests = report.requests,
            mean_latency_ms = format_args!("{:.1}", report.mean_latency_ms),
            rps = format_args!("{:.1}", report.requests_per_second),
            total = report.total_requests,
            "partial report"
        );

        self.partial_requests = 0;
        self.partial_time_ms = 0.0;
        self.partial_started = now;
        report
    }

    /// Compute the result so far (final once the run has finished).
    #[must_use]
    pub fn result(&self) -> LoadResult {
        let elapsed = match self.started {
            Some(started) => self
                .finished
                .unwrap_or_else(Instant::now)
                .duration_since(started)
                .as_secs_f64(),
            None => 0.0,
        };

        LoadResult {
            total_requests: self.total_requests,
            total_errors: self.total_errors,
            total_time_seconds: elapsed,
            requests_per_second: rate(self.total_requests, elapsed),
            mean_latency_ms: mean(self.total_time_ms, self.total_requests),
            min_latency_ms: if self.total_requests == 0 { 0.0 } else { self.min_ms },
            max_latency_ms: self.max_ms,
            percentiles: Percentiles {
                p50: self.percentile(50.0),
                p90: self.percentile(90.0),
                p95: self.percentile(95.0),
                p99: self.percentile(99.0),
            },
            error_codes: self.error_codes.clone(),
        }
    }

    /// First bucket at which the cumulative share strictly exceeds `percent`.
    #[must_use]
    pub fn percentile(&self, percent: f64) -> Option<u64> {
        let total: u64 = self.histogram.values().sum();
        if total == 0 {
            return None;
        }
        let mut cumulative = 0u64;
        for (&bucket, &count) in &self.histogram {
            cumulative += count;
            if cumulative as f64 * 100.0 / total as f64 > percent {
                return Some(bucket);
            }
        }
        None
    }
}

impl std::fmt::Debug for LatencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyTracker")
            .field("running", &self.running)
            .field("in_flight", &self.in_flight.len())
            .field("total_requests", &self.total_requests)
            .field("total_errors", &self.total_errors)
            .field("max_requests", &self.max_requests)
            .field("max_seconds", &self.max_seconds)
            .finish_non_exhaustive()
    }
}

fn mean(total_ms: f64, count: u64) -> f64 {
    if count == 0 { 0.0 } else { total_ms / count as f64 }
}

fn rate(count: u64, seconds: f64) -> f64 {
    if seconds > 0.0 { count as f64 / seconds } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn started(max_requests: Option<u64>) -> LatencyTracker {
        let mut tracker = LatencyTracker::new(max_requests, None);
        tracker.start();
        tracker
    }

    #[test]
    fn test_begin_end() {
        let mut tracker = started(None);
        let id = tracker.begin(None);
        assert_eq!(tracker.in_flight(), 1);

        let elapsed = tracker.end(id, None);
        assert!(elapsed.is_some_and(|ms| ms >= 0.0));
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.result().total_requests, 1);
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let mut tracker = started(None);
        let a = tracker.begin(None);
        let b = tracker.begin(None);
        assert_ne!(a, b);
        assert_eq!(tracker.in_flight(), 2);
    }

    #[test]
    fn test_generated_ids_skip_explicit_ids_in_flight() {
        let mut tracker = started(None);
        tracker.begin(Some(0));
        tracker.begin(Some(1));
        tracker.begin(Some(3));

        let generated: Vec<_> = (0..3).map(|_| tracker.begin(None)).collect();
        assert_eq!(generated, vec![2, 4, 5]);
        assert_eq!(tracker.in_flight(), 6);

        for id in [0, 1, 2, 3, 4, 5] {
            assert!(tracker.end(id, None).is_some());
        }
        assert_eq!(tracker.result().total_requests, 6);
    }

    #[test]
    fn test_end_unknown_id() {
        let mut tracker = started(None);
        assert_eq!(tracker.end(42, None), None);
        assert_eq!(tracker.result().total_requests, 0);
    }

    #[test]
    fn test_end_twice_counts_once() {
        let mut tracker = started(None);
        let id = tracker.begin(Some(7));
        assert!(tracker.end(id, Some("500")).is_some());
        assert_eq!(tracker.end(id, Some("500")), None);

        let result = tracker.result();
        assert_eq!(result.total_requests, 1);
        assert_eq!(result.total_errors, 1);
    }

    #[test]
    fn test_end_before_start_is_ignored() {
        let mut tracker = LatencyTracker::new(None, None);
        let id = tracker.begin(None);
        assert_eq!(tracker.end(id, None), None);
    }

    #[test]
    fn test_max_requests_with_one_error() {
        let mut tracker = started(Some(10));
        for _ in 0..9 {
            let id = tracker.begin(None);
            tracker.end(id, None);
        }
        let id = tracker.begin(None);
        tracker.end(id, Some("503"));

        assert!(!tracker.is_running());
        let result = tracker.result();
        assert_eq!(result.total_requests, 10);
        assert_eq!(result.total_errors, 1);
        assert_eq!(result.error_codes.len(), 1);
        assert_eq!(result.error_codes.get("503"), Some(&1));
    }

    #[test]
    fn test_terminal_after_finish() {
        let mut tracker = started(Some(1));
        let a = tracker.begin(None);
        let b = tracker.begin(None);
        tracker.end(a, None);
        assert_eq!(tracker.end(b, None), None);
        assert_eq!(tracker.result().total_requests, 1);
    }

    #[test]
    fn test_completion_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut tracker = LatencyTracker::new(Some(2), None).with_completion(Box::new(move |r: &LoadResult| {
            assert_eq!(r.total_requests, 2);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        tracker.start();

        let ids: Vec<_> = (0..4).map(|_| tracker.begin(None)).collect();
        for id in ids {
            tracker.end(id, None);
        }
        assert!(!tracker.finish());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_seconds() {
        let mut tracker = LatencyTracker::new(None, Some(Duration::from_millis(10)));
        tracker.start();
        assert!(!tracker.should_stop());
        std::thread::sleep(Duration::from_millis(20));
        assert!(tracker.should_stop());
    }

    #[test]
    fn test_percentiles_empty() {
        let tracker = started(None);
        let result = tracker.result();
        assert_eq!(result.percentiles, Percentiles::default());
        assert_eq!(result.mean_latency_ms, 0.0);
        assert_eq!(result.min_latency_ms, 0.0);
    }

    #[test]
    fn test_percentile_walk() {
        let mut tracker = started(None);
        for (ms, count) in [(10.0, 50), (20.0, 40), (50.0, 9), (80.0, 1)] {
            for _ in 0..count {
                tracker.record(ms, None);
            }
        }
        assert_eq!(tracker.percentile(50.0), Some(20));
        assert_eq!(tracker.percentile(90.0), Some(50));
        assert_eq!(tracker.percentile(95.0), Some(50));
        assert_eq!(tracker.percentile(99.0), Some(80));
    }

    #[test]
    fn test_show_partial_resets_interval_only() {
        let mut tracker = started(None);
        for _ in 0..3 {
            let id = tracker.begin(None);
            tracker.end(id, None);
        }
        let first = tracker.show_partial();
        assert_eq!(first.requests, 3);
        assert_eq!(first.total_requests, 3);

        let second = tracker.show_partial();
        assert_eq!(second.requests, 0);
        assert_eq!(second.mean_latency_ms, 0.0);
        assert_eq!(tracker.result().total_requests, 3);
    }

    proptest::proptest! {
        #[test]
        fn prop_percentiles_are_monotonic(samples in proptest::collection::vec(0.0f64..5000.0, 1..300)) {
            let mut tracker = started(None);
            for ms in &samples {
                tracker.record(*ms, None);
            }
            let p = tracker.result().percentiles;
            let max = tracker.result().max_latency_ms.round() as u64;
            let (p50, p90, p95, p99) = (p.p50.unwrap(), p.p90.unwrap(), p.p95.unwrap(), p.p99.unwrap());
            proptest::prop_assert!(p50 <= p90 && p90 <= p95 && p95 <= p99 && p99 <= max);
        }
    }
}
