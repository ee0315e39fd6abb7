//! Socket connections for the raw-socket and WebSocket clients.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::config::{Plan, TlsOptions};
use crate::error::Result;

/// A plain TCP or TLS client stream.
pub enum NetStream {
    /// Unencrypted TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    #[cfg(feature = "tls-rustls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetStream::Plain(_) => f.write_str("NetStream::Plain"),
            #[cfg(feature = "tls-rustls")]
            NetStream::Tls(_) => f.write_str("NetStream::Tls"),
        }
    }
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls-rustls")]
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls-rustls")]
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls-rustls")]
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls-rustls")]
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens connections to the resolved target.
#[derive(Debug, Clone)]
pub struct Connector {
    host: String,
    port: u16,
    #[cfg(feature = "tls-rustls")]
    tls: Option<crate::tls::TlsConnector>,
}

impl Connector {
    /// Prepare connections to `plan`'s target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`](crate::Error::Tls) if the target needs TLS and the TLS
    /// configuration cannot be built.
    pub fn new(plan: &Plan, tls: &TlsOptions) -> Result<Self> {
        #[cfg(feature = "tls-rustls")]
        {
            let connector = if plan.secure {
                let config = crate::tls::client_config(tls.ca_file.as_deref())?;
                Some(crate::tls::TlsConnector::new(config))
            } else {
                None
            };
            Ok(Self {
                host: plan.host.clone(),
                port: plan.port,
                tls: connector,
            })
        }
        #[cfg(not(feature = "tls-rustls"))]
        {
            let _ = tls;
            if plan.secure {
                return Err(crate::error::Error::Tls("TLS targets need the `tls-rustls` feature".into()));
            }
            Ok(Self {
                host: plan.host.clone(),
                port: plan.port,
            })
        }
    }

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if connecting or the TLS handshake fails.
    pub async fn connect(&self) -> Result<NetStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(host = %self.host, port = self.port, "connected");

        #[cfg(feature = "tls-rustls")]
        if let Some(tls) = &self.tls {
            let stream = tls.connect(&self.host, stream).await?;
            return Ok(NetStream::Tls(Box::new(stream)));
        }

        Ok(NetStream::Plain(stream))
    }
}
