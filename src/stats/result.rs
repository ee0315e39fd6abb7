//! Structured results handed to the reporting sink.

use std::collections::BTreeMap;

use serde::Serialize;

/// Latency percentiles in whole milliseconds.
///
/// A percentile is `None` when no histogram bucket qualifies, which only
/// happens for a run without completed requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Percentiles {
    /// 50th percentile.
    #[serde(rename = "50")]
    pub p50: Option<u64>,
    /// 90th percentile.
    #[serde(rename = "90")]
    pub p90: Option<u64>,
    /// 95th percentile.
    #[serde(rename = "95")]
    pub p95: Option<u64>,
    /// 99th percentile.
    #[serde(rename = "99")]
    pub p99: Option<u64>,
}

/// Final result of a load-test run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadResult {
    /// Completed requests, successful or not.
    pub total_requests: u64,
    /// Completed requests that carried an error code.
    pub total_errors: u64,
    /// Wall-clock duration of the run.
    pub total_time_seconds: f64,
    /// Completed requests per second.
    pub requests_per_second: f64,
    /// Mean latency of completed requests.
    pub mean_latency_ms: f64,
    /// Fastest completed request.
    pub min_latency_ms: f64,
    /// Slowest completed request.
    pub max_latency_ms: f64,
    /// Latency percentiles.
    pub percentiles: Percentiles,
    /// Occurrences per error code.
    pub error_codes: BTreeMap<String, u64>,
}

impl LoadResult {
    /// Fraction of completed requests that failed.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64
        }
    }
}

/// Progress since the previous partial report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PartialReport {
    /// Requests completed in the interval.
    pub requests: u64,
    /// Mean latency of those requests.
    pub mean_latency_ms: f64,
    /// Completion rate over the interval.
    pub requests_per_second: f64,
    /// Length of the interval.
    pub interval_seconds: f64,
    /// Requests completed since the run started.
    pub total_requests: u64,
}
