//! Minimal HTTP + WebSocket target for trying out the load generator.
//!
//! Run with: `cargo run --example target_server -- --port 9001`
//! Then: `cargo run --example loadtest -- http://127.0.0.1:9001/ -n 10000`
//! or:   `cargo run --example loadtest -- ws://127.0.0.1:9001/ws -n 10000`

use std::error::Error;
use std::time::Duration;

use axum::Router;
use axum::extract::Path;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Echo target for rsload")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(short, long, default_value_t = 9001)]
    port: u16,

    /// Delay added to every HTTP response, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let delay = Duration::from_millis(args.delay_ms);

    let app = Router::new()
        .route(
            "/",
            any(move |body: axum::body::Bytes| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if body.is_empty() { axum::body::Bytes::from_static(b"ok") } else { body }
            }),
        )
        .route("/status/{code}", get(status))
        .route("/ws", get(ws));

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "target server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn ws(upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(echo)
}

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    tracing::debug!("websocket closed");
}
