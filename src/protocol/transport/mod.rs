//! Byte channels underneath a [`Connection`](super::Connection).
//!
//! A [`Transport`] owns one socket together with its own read and write
//! buffers. Two implementations share the contract:
//!
//! - [`BlockingTransport`] blocks the calling OS thread. Every call is bounded
//!   by a deadline; a read that runs out of time returns what it has, a write
//!   that runs out of time fails with [`TransportError::TimedOut`].
//! - [`AsyncTransport`] issues non-blocking I/O on a socket registered with
//!   the scheduler's reactor. When an operation cannot complete, the calling
//!   task blocks until the reactor reports progress. Only background tasks
//!   may use it.
//!
//! # Contract
//!
//! - `read(dst, required, up_to)` appends at least `required` and at most
//!   `up_to` bytes to `dst`. Fewer than `required` means end of stream (or,
//!   for the blocking variant, a timeout).
//! - `read_line(dst, max)` appends bytes through the next `\n`, or `max`
//!   bytes, or whatever arrived before end of stream. Bytes past the line
//!   stay buffered in the transport.
//! - `queue(bytes)` stages output without sending it.
//! - `write(buf)` sends the staged output followed by `buf` as one gathered
//!   write and empties the stage.
//! - `close()` releases the socket. Closing twice is a no-op.
use std::{future::Future, io};

use thiserror::Error;

use crate::Buffer;

mod blocking;
mod nonblocking;

#[cfg(test)]
pub(crate) mod memory;

pub use blocking::BlockingTransport;
pub use nonblocking::{AsyncTransport, SessionCloser};

/// Largest amount of output accepted by one `write`, staged bytes included.
pub const DEFAULT_MAX_WRITE: usize = 16 * 1024 * 1024;

/// Bytes requested from the OS per socket read.
const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection lost")]
    LostConnection,

    #[error("write of {size} bytes exceeds the {limit} byte limit")]
    WriteTooLarge { size: usize, limit: usize },

    #[error("timed out")]
    TimedOut,

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Maps socket errors that mean the peer went away to `LostConnection`.
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => TransportError::LostConnection,
            _ => TransportError::Io(err),
        }
    }
}

pub trait Transport {
    fn read(
        &mut self,
        dst: &mut Buffer,
        required: usize,
        up_to: usize,
    ) -> impl Future<Output = Result<usize, TransportError>>;

    fn read_line(
        &mut self,
        dst: &mut Buffer,
        max: usize,
    ) -> impl Future<Output = Result<usize, TransportError>>;

    fn queue(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    fn write(&mut self, buf: &[u8]) -> impl Future<Output = Result<(), TransportError>>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// Length of the line at the front of `buf`, if one is complete.
pub(crate) fn line_end(buf: &Buffer, max: usize) -> Option<usize> {
    match buf.find(b'\n') {
        Some(i) if i < max => Some(i + 1),
        _ if buf.available() >= max => Some(max),
        _ => None,
    }
}

/// Moves up to `up_to` unread bytes from `src` to `dst`.
pub(crate) fn drain_into(src: &mut Buffer, dst: &mut Buffer, up_to: usize) -> usize {
    let n = src.available().min(up_to);
    if let Some(bytes) = src.take(n) {
        dst.put(bytes);
    }
    if src.is_empty() {
        src.clear();
    }
    n
}

/// Rejects output that would push the stage past `limit`.
pub(crate) fn check_write(staged: usize, extra: usize, limit: usize) -> Result<(), TransportError> {
    let size = staged + extra;
    if size > limit {
        return Err(TransportError::WriteTooLarge { size, limit });
    }
    Ok(())
}
