use std::{
    io::{self, IoSlice, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use log::debug;

use crate::Buffer;

use super::{DEFAULT_MAX_WRITE, READ_CHUNK, Transport, TransportError, check_write, drain_into, line_end};

pub struct BlockingTransport {
    stream: Option<TcpStream>,
    rbuf: Buffer,
    wbuf: Buffer,
    timeout: Duration,
    max_write: usize,
}

impl BlockingTransport {
    pub fn new(stream: TcpStream, timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            rbuf: Buffer::new(),
            wbuf: Buffer::new(),
            timeout,
            max_write: DEFAULT_MAX_WRITE,
        }
    }

    /// Connects to the first reachable address, waiting at most `timeout`
    /// for each attempt.
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self, TransportError> {
        let mut last_err = None;
        for addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("connected to {addr}");
                    return Ok(Self::new(stream, timeout));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to connect to"))
            .into())
    }

    pub fn with_max_write(mut self, limit: usize) -> Self {
        self.max_write = limit;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, TransportError> {
        let stream = self.stream.as_ref().ok_or(TransportError::LostConnection)?;
        Ok(stream.peer_addr()?)
    }

    /// Reads one chunk into the read buffer. Returns 0 at end of stream.
    fn fill(&mut self, deadline: Instant) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::LostConnection)?;
        self.rbuf.remove();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::TimedOut);
            }
            stream.set_read_timeout(Some(remaining))?;

            match self.rbuf.read_from(stream, READ_CHUNK) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(TransportError::TimedOut);
                }
                Err(e) => match TransportError::from_io(e) {
                    TransportError::LostConnection => return Ok(0),
                    other => return Err(other),
                },
            }
        }
    }
}

impl Transport for BlockingTransport {
    async fn read(
        &mut self,
        dst: &mut Buffer,
        required: usize,
        up_to: usize,
    ) -> Result<usize, TransportError> {
        let deadline = Instant::now() + self.timeout;
        while self.rbuf.available() < required {
            match self.fill(deadline) {
                Ok(0) | Err(TransportError::TimedOut) => break,
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(drain_into(&mut self.rbuf, dst, up_to.max(required)))
    }

    async fn read_line(&mut self, dst: &mut Buffer, max: usize) -> Result<usize, TransportError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(n) = line_end(&self.rbuf, max) {
                return Ok(drain_into(&mut self.rbuf, dst, n));
            }
            match self.fill(deadline) {
                Ok(0) | Err(TransportError::TimedOut) => {
                    return Ok(drain_into(&mut self.rbuf, dst, max));
                }
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn queue(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        check_write(self.wbuf.available(), bytes.len(), self.max_write)?;
        self.wbuf.put(bytes);
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        if let Err(e) = check_write(self.wbuf.available(), buf.len(), self.max_write) {
            self.wbuf.clear();
            return Err(e);
        }

        let deadline = Instant::now() + self.timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::LostConnection)?;
        let mut sent = 0;

        while !self.wbuf.is_empty() || sent < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::TimedOut);
            }
            stream.set_write_timeout(Some(remaining))?;

            let slices = [IoSlice::new(self.wbuf.unread()), IoSlice::new(&buf[sent..])];
            match stream.write_vectored(&slices) {
                Ok(0) => return Err(TransportError::LostConnection),
                Ok(n) => {
                    let staged = n.min(self.wbuf.available());
                    self.wbuf.consume(staged);
                    sent += n - staged;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(TransportError::TimedOut);
                }
                Err(e) => return Err(TransportError::from_io(e)),
            }
        }

        self.wbuf.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        debug!("closing blocking transport");
        match stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl Drop for BlockingTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
