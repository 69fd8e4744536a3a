//! Scripted in-memory transport for unit tests.

use std::{collections::VecDeque, future::Future};

use crate::{Buffer, Scheduler, SchedulerConfig};

use super::{DEFAULT_MAX_WRITE, Transport, TransportError, check_write, drain_into, line_end};

/// Drives `future` to completion on a throwaway scheduler.
pub(crate) fn run<F: Future>(future: F) -> F::Output {
    let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    scheduler.run(future)
}

/// Serves reads from a script of chunks, one chunk per simulated socket
/// read, and records everything written.
#[derive(Debug, Default)]
pub(crate) struct MemoryTransport {
    chunks: VecDeque<Vec<u8>>,
    rbuf: Buffer,
    staged: Buffer,
    pub socket_reads: usize,
    pub written: Vec<u8>,
    pub closed: bool,
}

impl MemoryTransport {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    fn fill(&mut self) -> bool {
        match self.chunks.pop_front() {
            Some(chunk) => {
                self.socket_reads += 1;
                self.rbuf.put(&chunk);
                true
            }
            None => false,
        }
    }
}

impl Transport for MemoryTransport {
    async fn read(
        &mut self,
        dst: &mut Buffer,
        required: usize,
        up_to: usize,
    ) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::LostConnection);
        }
        while self.rbuf.available() < required && self.fill() {}
        Ok(drain_into(&mut self.rbuf, dst, up_to.max(required)))
    }

    async fn read_line(&mut self, dst: &mut Buffer, max: usize) -> Result<usize, TransportError> {
        loop {
            if let Some(n) = line_end(&self.rbuf, max) {
                return Ok(drain_into(&mut self.rbuf, dst, n));
            }
            if !self.fill() {
                return Ok(drain_into(&mut self.rbuf, dst, max));
            }
        }
    }

    fn queue(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        check_write(self.staged.available(), bytes.len(), DEFAULT_MAX_WRITE)?;
        self.staged.put(bytes);
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::LostConnection);
        }
        check_write(self.staged.available(), buf.len(), DEFAULT_MAX_WRITE)?;
        self.written.extend_from_slice(self.staged.unread());
        self.written.extend_from_slice(buf);
        self.staged.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}
