use std::{error::Error, net::ToSocketAddrs};

use log::{debug, error};

use crate::scheduler::{Scheduler, SchedulerConfig};

use super::{
    BlockingTransport, Connection, Request, Response, WireError, client_handshake,
    transport::Transport,
};

/// Called with any failure a [`Client`] hits. Never returns.
pub type FatalHandler = fn(&dyn Error) -> !;

/// Default [`FatalHandler`]: logs the failure and exits the process.
pub fn exit_on_fatal(err: &dyn Error) -> ! {
    error!("lost the server: {err}");
    eprintln!("fatal: {err}");
    std::process::exit(1)
}

/// Client side of a connection.
///
/// On the client, losing the server is not something a caller recovers
/// from, so every I/O or protocol failure goes to the client's
/// [`FatalHandler`] instead of being returned.
pub struct Client<T: Transport = BlockingTransport> {
    scheduler: Scheduler,
    conn: Connection<T>,
    on_fatal: FatalHandler,
}

impl Client<BlockingTransport> {
    pub fn connect<A: ToSocketAddrs>(addr: A, config: &SchedulerConfig) -> Self {
        Self::connect_with(addr, config, exit_on_fatal)
    }

    pub fn connect_with<A: ToSocketAddrs>(
        addr: A,
        config: &SchedulerConfig,
        on_fatal: FatalHandler,
    ) -> Self {
        match BlockingTransport::connect(addr, config.io_timeout) {
            Ok(transport) => Self::from_transport(transport, config, on_fatal),
            Err(e) => on_fatal(&e),
        }
    }
}

impl<T: Transport> Client<T> {
    /// Wraps an open transport and performs the client handshake.
    pub fn from_transport(transport: T, config: &SchedulerConfig, on_fatal: FatalHandler) -> Self {
        let scheduler = match Scheduler::new(config.clone()) {
            Ok(scheduler) => scheduler,
            Err(e) => on_fatal(&e),
        };

        let mut client = Self {
            scheduler,
            conn: Connection::new(transport),
            on_fatal,
        };
        let Self { scheduler, conn, .. } = &mut client;
        let handshake = scheduler.run(client_handshake(conn));
        client.check(handshake);
        client
    }

    fn check<R>(&self, result: Result<R, WireError>) -> R {
        result.unwrap_or_else(|e| (self.on_fatal)(&e))
    }

    /// Sends `request` and waits for its response.
    pub fn request(&mut self, request: &Request) -> Response {
        let Self { scheduler, conn, .. } = self;
        let result = scheduler.run(async {
            conn.put(request)?;
            conn.flush().await?;
            conn.get::<Response>().await
        });
        self.check(result)
    }

    /// Queues raw bytes for the next flush.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.conn.put_raw(bytes);
    }

    pub fn flush(&mut self) {
        let Self { scheduler, conn, .. } = self;
        let result = scheduler.run(conn.flush());
        self.check(result.map_err(WireError::from));
    }

    pub fn read_exact(&mut self, n: usize) -> Vec<u8> {
        let Self { scheduler, conn, .. } = self;
        let result = scheduler.run(conn.read_exact(n));
        self.check(result.map_err(WireError::from))
    }

    /// Ends the session politely and releases the transport.
    pub fn close(mut self) {
        let response = self.request(&Request::Close);
        debug!("server answered close with {response}");
        if let Err(e) = self.conn.close() {
            debug!("failed to close transport: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Buffer,
        protocol::{HANDSHAKE, WireType, transport::memory::MemoryTransport},
    };

    use super::*;

    fn fatal_panic(err: &dyn Error) -> ! {
        panic!("fatal: {err}")
    }

    fn encoded(response: &Response) -> Vec<u8> {
        let mut out = Buffer::new();
        response.encode(&mut out).unwrap();
        out.unread().to_vec()
    }

    #[test]
    fn request_round_trip() {
        let transport = MemoryTransport::new([HANDSHAKE.to_vec(), encoded(&Response::Pong)]);
        let mut client = Client::from_transport(transport, &SchedulerConfig::default(), fatal_panic);

        assert_eq!(client.request(&Request::Ping), Response::Pong);
        assert_eq!(client.conn.transport().written, [&HANDSHAKE[..], &[0u8][..]].concat());
    }

    #[test]
    #[should_panic(expected = "fatal: handshake mismatch")]
    fn handshake_mismatch_is_fatal() {
        let transport = MemoryTransport::new([b"NOTWEFT!".to_vec()]);
        Client::from_transport(transport, &SchedulerConfig::default(), fatal_panic);
    }

    #[test]
    #[should_panic(expected = "fatal: connection lost")]
    fn lost_server_is_fatal() {
        let transport = MemoryTransport::new([HANDSHAKE.to_vec()]);
        let mut client = Client::from_transport(transport, &SchedulerConfig::default(), fatal_panic);

        client.request(&Request::Ping);
    }
}
