//! Connection I/O wrappers
//!
//! Thin layer over tokio's TCP types that applies the protocol's deadlines
//! and classifies failures into Timeout, EOF, and fatal errors so callers
//! can retry, clean up, or abort accordingly.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::info;

use crate::error::NetError;
use crate::protocol::{ACCEPT_TIMEOUT, READ_BUFFER_SIZE, READ_TIMEOUT};

/// The server's listening socket with deadline-bounded accepts.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind the listener to the given address.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        info!("Server is listening on {}", inner.local_addr()?);
        Ok(Listener { inner })
    }

    /// The bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept one connection, waiting at most the accept deadline.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), NetError> {
        match timeout(ACCEPT_TIMEOUT, self.inner.accept()).await {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(e)) => Err(NetError::Fatal(e)),
            Err(_) => Err(NetError::Timeout),
        }
    }
}

/// Read one chunk of bytes with the per-read deadline applied.
///
/// Returns the number of bytes read; a zero-length read is reported as EOF,
/// an expired deadline as Timeout.
pub async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, NetError>
where
    R: AsyncRead + Unpin,
{
    match timeout(READ_TIMEOUT, reader.read(buf)).await {
        Ok(Ok(0)) => Err(NetError::Eof),
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(NetError::Fatal(e)),
        Err(_) => Err(NetError::Timeout),
    }
}

/// Write a whole frame to the peer.
///
/// Frames longer than the wire buffer are refused; the peer could never
/// have read them in one piece.
pub async fn write_frame<W>(writer: &mut W, frame: &str) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    if frame.is_empty() {
        return Err(NetError::SendFailed);
    }
    if frame.len() > READ_BUFFER_SIZE {
        return Err(NetError::SendFailed);
    }

    writer
        .write_all(frame.as_bytes())
        .await
        .map_err(|_| NetError::SendFailed)
}
