//! Per-connection client handle
//!
//! Holds the two halves of a TCP connection behind separate mutexes so one
//! sender and one receiver may work concurrently, plus the frame
//! reassembler that owns the receive residue and the activity clock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::codec::{escape_for_log, split_frame};
use crate::command::ServerMessage;
use crate::error::NetError;
use crate::net::{read_chunk, write_frame};
use crate::protocol::{COMPLETE_MSG_TIMEOUT, MSG_TERMINATOR, READ_BUFFER_SIZE};

/// Reassembles newline-terminated frames out of arbitrarily chunked reads.
///
/// The residue holds bytes already read but not yet consumed as a complete
/// frame. After a successful call the residue is exactly the bytes received
/// after the returned frame's terminator.
pub struct FrameReader<R> {
    source: R,
    residue: Vec<u8>,
    last_activity: Instant,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(source: R) -> Self {
        FrameReader {
            source,
            residue: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    /// Time since the last successful read from the peer.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Re-insert a raw frame at the front of the residue.
    ///
    /// Used by the keep-alive probe to defer an application frame that
    /// arrived ahead of the expected PONG; prepending preserves arrival
    /// order relative to later bytes.
    pub fn push_back(&mut self, raw: &str) {
        let mut restored = Vec::with_capacity(raw.len() + self.residue.len());
        restored.extend_from_slice(raw.as_bytes());
        restored.append(&mut self.residue);
        self.residue = restored;
    }

    /// Read one complete frame, terminator included.
    ///
    /// If the residue already holds a terminator the frame is returned
    /// without touching the socket. Otherwise bytes are read under the
    /// per-read deadline until a terminator arrives or the whole-frame
    /// deadline expires; on expiry the partial bytes stay in the residue
    /// and the call fails with `FrameTimeout`.
    pub async fn read_frame(&mut self) -> Result<String, NetError> {
        let deadline = Instant::now() + COMPLETE_MSG_TIMEOUT;

        loop {
            if let Some((frame, consumed)) = split_frame(&self.residue) {
                let frame = String::from_utf8(frame.to_vec()).map_err(|_| {
                    NetError::Fatal(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "frame is not valid UTF-8",
                    ))
                })?;
                self.residue.drain(..consumed);
                return Ok(frame);
            }

            if Instant::now() >= deadline {
                return Err(NetError::FrameTimeout);
            }

            let mut buf = [0u8; READ_BUFFER_SIZE];
            match read_chunk(&mut self.source, &mut buf).await {
                Ok(n) => {
                    self.residue.extend_from_slice(&buf[..n]);
                    self.last_activity = Instant::now();
                }
                Err(NetError::Timeout) if !self.residue.is_empty() => {
                    // a frame is underway, keep reading until the
                    // whole-frame deadline
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A connected client.
///
/// Created on accept and owned by the registry; session actors and the
/// scheduler share it through `Arc`. The send and receive sides are locked
/// independently so the scheduler can write while the session reads.
pub struct Client {
    addr: SocketAddr,
    reader: Mutex<FrameReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
}

impl Client {
    /// Wrap an accepted connection.
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        Arc::new(Client {
            addr,
            reader: Mutex::new(FrameReader::new(read_half)),
            writer: Mutex::new(write_half),
        })
    }

    /// The peer's remote address; keys the pending table.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Time since the peer last sent bytes.
    pub async fn idle_for(&self) -> Duration {
        self.reader.lock().await.idle_for()
    }

    /// Read one complete raw frame from the peer.
    pub async fn read_frame(&self) -> Result<String, NetError> {
        let raw = self.reader.lock().await.read_frame().await?;
        debug!("Received frame \"{}\" from {}", escape_for_log(&raw), self.addr);
        Ok(raw)
    }

    /// Defer a frame for the next read.
    pub async fn push_back(&self, raw: &str) {
        self.reader.lock().await.push_back(raw);
    }

    /// Send a protocol message to the peer.
    pub async fn send(&self, msg: &ServerMessage) -> Result<(), NetError> {
        let frame = msg.encode().map_err(|_| NetError::SendFailed)?;
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &frame).await?;
        debug!("Sent frame \"{}\" to {}", escape_for_log(&frame), self.addr);
        Ok(())
    }

    /// Shut down the write side, flushing pending bytes.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Quick check that a raw frame is a lone terminator-completed verb frame
/// matching the given verb. Used by the keep-alive probe.
pub fn frame_is_verb(raw: &str, verb: &str) -> bool {
    let Some(body) = raw.strip_suffix(MSG_TERMINATOR) else {
        return false;
    };
    let mut parts = body.split(crate::protocol::MSG_DELIMITER);
    parts.next() == Some(crate::protocol::MSG_HEADER)
        && parts.next() == Some(verb)
        && parts.next().is_none()
}
