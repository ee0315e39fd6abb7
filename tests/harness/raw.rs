//! Scripted HTTP/1.1 server over plain TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the server answers each request.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write `response` whole and keep the connection open.
    Reply(&'static [u8]),
    /// Write each chunk separately, pausing between writes.
    Split(Vec<&'static [u8]>),
    /// Write `response`, then close the connection.
    ReplyAndClose(&'static [u8]),
}

pub const OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";

/// Running scripted server.
pub struct RawServer {
    connections: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl RawServer {
    pub async fn spawn(behavior: Behavior) -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));

        let conns = Arc::clone(&connections);
        let reqs = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                conns.fetch_add(1, Ordering::SeqCst);
                let behavior = behavior.clone();
                let reqs = Arc::clone(&reqs);
                tokio::spawn(serve(stream, behavior, reqs));
            }
        });

        (
            Self {
                connections,
                requests,
                handle,
            },
            addr,
        )
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Complete request heads received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

async fn serve(mut stream: TcpStream, behavior: Behavior, requests: Arc<AtomicUsize>) {
    let mut buf = Vec::with_capacity(4096);
    while read_request(&mut stream, &mut buf).await {
        requests.fetch_add(1, Ordering::SeqCst);
        let result = match &behavior {
            Behavior::Reply(response) => stream.write_all(response).await,
            Behavior::Split(chunks) => {
                let mut result = Ok(());
                for chunk in chunks {
                    result = stream.write_all(chunk).await;
                    if result.is_err() {
                        break;
                    }
                    let _ = stream.flush().await;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                result
            }
            Behavior::ReplyAndClose(response) => {
                let _ = stream.write_all(response).await;
                return;
            }
        };
        if result.is_err() {
            return;
        }
    }
}

/// Read one request head plus its body into `buf`, consuming it.
///
/// Returns `false` on EOF or error.
async fn read_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> bool {
    loop {
        if let Some(end) = find_head_end(buf) {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let total = end + 4 + body_len;
            if buf.len() >= total {
                buf.drain(..total);
                return true;
            }
        }
        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
