//! Latency measurement and run statistics.

mod result;
mod tracker;

pub use result::{LoadResult, PartialReport, Percentiles};
pub use tracker::{CompletionCallback, LatencyTracker, RequestId};
