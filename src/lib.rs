//! # rsload - HTTP and WebSocket load generation
//!
//! `rsload` drives a configurable number of virtual users against a single
//! URL and reports throughput, latency percentiles and error counts.
//!
//! ## Features
//!
//! - **Closed-loop** dispatch (`concurrency` users, each sending back to back)
//! - **Open-loop** dispatch at a fixed rate with a drift-correcting timer
//! - **Three clients**: library HTTP, raw-socket HTTP/1.1 and WebSocket
//! - **Per-request hooks**: generators, index tokens, status callbacks and
//!   content inspectors
//! - **TLS** for `https://` and `wss://` behind the `tls-rustls` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rsload::Config;
//!
//! # async fn demo() -> rsload::Result<()> {
//! let result = rsload::run(
//!     Config::new("http://localhost:8080/")
//!         .with_concurrency(10)
//!         .with_max_requests(1000),
//! )
//! .await?;
//! println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
mod context;
pub mod error;
pub mod http;
pub mod loadtest;
pub mod net;
mod pool;
pub mod stats;
pub mod timer;
pub mod ws;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use client::{RequestOutcome, ResponseView};
pub use config::{Body, ClientKind, ClientMode, Config, Plan, RequestGenerator, TlsOptions};
pub use error::{Error, RequestError, Result};
pub use http::{ParseState, ResponseParser, ShapeCache};
pub use loadtest::{LoadTest, RunState, StopHandle, run};
pub use stats::{LatencyTracker, LoadResult, PartialReport, Percentiles};
pub use timer::DriftCorrectingTimer;
