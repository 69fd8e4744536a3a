use crate::Buffer;

use super::transport::{Transport, TransportError};

/// Smallest read a connection asks its transport for.
pub const MIN_READ_CHUNK: usize = 4096;

/// A transport plus the read-ahead and output buffers the serializer works
/// on.
///
/// The read-ahead buffer is separate from the transport's own buffer: the
/// transport keeps line-framing leftovers there, the connection absorbs bulk
/// reads here.
pub struct Connection<T: Transport> {
    transport: T,
    pub(crate) inbuf: Buffer,
    pub(crate) outbuf: Buffer,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            inbuf: Buffer::with_capacity(MIN_READ_CHUNK),
            outbuf: Buffer::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Unread bytes in the read-ahead buffer.
    pub fn buffered(&self) -> usize {
        self.inbuf.available()
    }

    /// Ensures at least `n` unread bytes are buffered, issuing at most one
    /// transport read.
    ///
    /// # Errors
    /// [`TransportError::LostConnection`] if the stream ends first.
    pub async fn need(&mut self, n: usize) -> Result<(), TransportError> {
        let available = self.inbuf.available();
        if available >= n {
            return Ok(());
        }

        let deficit = n - available;
        self.inbuf.remove();
        let got = self
            .transport
            .read(&mut self.inbuf, deficit, deficit.max(MIN_READ_CHUNK))
            .await?;
        if got < deficit {
            return Err(TransportError::LostConnection);
        }
        Ok(())
    }

    /// Reads exactly `n` bytes.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        self.need(n).await?;
        let bytes = self.inbuf.take(n).ok_or(TransportError::LostConnection)?;
        Ok(bytes.to_vec())
    }

    /// Appends raw bytes to the output buffer.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.outbuf.put(bytes);
    }

    /// Sends the output buffer and drops consumed read-ahead bytes.
    ///
    /// Unread bytes stay buffered, so a request pipelined behind the one
    /// just answered is not lost.
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        let result = self.transport.write(self.outbuf.unread()).await;
        self.outbuf.clear();
        self.inbuf.remove();
        result
    }

    pub fn close(&mut self) -> Result<(), TransportError> {
        self.transport.close()
    }
}
