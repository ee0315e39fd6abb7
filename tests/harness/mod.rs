//! Test targets for the load engine.
//!
//! [`TestServer`] is an axum HTTP + WebSocket server with routes for the
//! cases the integration tests need. [`RawServer`] is a hand-written TCP
//! server for HTTP framing cases a real server never produces.

#![allow(dead_code)]

mod raw;
mod server;

pub use raw::{Behavior, OK_RESPONSE, RawServer};
pub use server::{Recorded, TestServer};

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
