//! axum-based target server.
//!
//! Routes:
//! - `GET /` answers `ok`
//! - `GET /delay/{ms}` sleeps, then answers `ok`
//! - `GET /status/{code}` answers with an empty body and that status
//! - `GET /redirect` answers `302 Found` pointing at `/`
//! - `ANY /record` stores query, body and selected headers, then answers `ok`
//! - `GET /ws` echoes WebSocket text and binary messages
//! - `GET /ws/noisy` like `/ws`, but sends an unrelated message before each echo
//!
//! Every HTTP route counts the request on arrival, before any delay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One request seen by `/record`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub query: String,
    pub body: String,
    pub cookie: Option<String>,
    pub content_type: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Default)]
struct Shared {
    hits: AtomicU64,
    ws_messages: AtomicU64,
    recorded: Mutex<Vec<Recorded>>,
}

type AppState = Arc<Shared>;

/// Running target server.
pub struct TestServer {
    shared: AppState,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Bind to an ephemeral port and start serving.
    pub async fn spawn() -> (Self, SocketAddr) {
        let shared: AppState = Arc::default();
        let app = Router::new()
            .route("/", get(fast))
            .route("/delay/{ms}", get(delayed))
            .route("/status/{code}", get(status))
            .route("/redirect", get(redirect))
            .route("/record", any(record))
            .route("/ws", get(ws_echo))
            .route("/ws/noisy", get(ws_noisy))
            .with_state(Arc::clone(&shared));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        (
            Self {
                shared,
                shutdown: Some(tx),
                handle,
            },
            addr,
        )
    }

    /// HTTP requests received so far.
    pub fn hits(&self) -> u64 {
        self.shared.hits.load(Ordering::SeqCst)
    }

    /// Reader of the hit counter that outlives borrows of the server.
    pub fn hit_counter(&self) -> impl Fn() -> u64 + Send + Sync + 'static {
        let shared = Arc::clone(&self.shared);
        move || shared.hits.load(Ordering::SeqCst)
    }

    /// WebSocket messages echoed so far.
    pub fn ws_messages(&self) -> u64 {
        self.shared.ws_messages.load(Ordering::SeqCst)
    }

    /// Requests seen by `/record`, in arrival order.
    pub fn recorded(&self) -> Vec<Recorded> {
        self.shared.recorded.lock().clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        // Open WebSocket connections keep graceful shutdown waiting.
        if tokio::time::timeout(Duration::from_secs(1), &mut self.handle)
            .await
            .is_err()
        {
            self.handle.abort();
        }
    }
}

async fn fast(State(shared): State<AppState>) -> &'static str {
    shared.hits.fetch_add(1, Ordering::SeqCst);
    "ok"
}

async fn delayed(State(shared): State<AppState>, Path(ms): Path<u64>) -> &'static str {
    shared.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "ok"
}

async fn status(State(shared): State<AppState>, Path(code): Path<u16>) -> StatusCode {
    shared.hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn redirect(State(shared): State<AppState>) -> impl IntoResponse {
    shared.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::FOUND, [(header::LOCATION, "/")])
}

async fn record(
    State(shared): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    shared.hits.fetch_add(1, Ordering::SeqCst);
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    shared.recorded.lock().push(Recorded {
        query: uri.query().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
        cookie: text(header::COOKIE),
        content_type: text(header::CONTENT_TYPE),
        user_agent: text(header::USER_AGENT),
    });
    "ok"
}

async fn ws_echo(State(shared): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| echo(socket, shared, false))
}

async fn ws_noisy(State(shared): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| echo(socket, shared, true))
}

async fn echo(mut socket: WebSocket, shared: AppState, noisy: bool) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                shared.ws_messages.fetch_add(1, Ordering::SeqCst);
                if noisy
                    && socket
                        .send(Message::Text(String::from(r#"{"event":"tick"}"#).into()))
                        .await
                        .is_err()
                {
                    break;
                }
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}
