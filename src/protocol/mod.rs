//! Client-server communication protocol.
//!
//! This module layers the request/response protocol spoken between weft
//! clients and servers on top of the cooperative scheduler. From the bottom
//! up:
//!
//! - [`Transport`]: a socket plus its own read and write buffers, in a
//!   blocking ([`BlockingTransport`]) and a scheduler-driven
//!   ([`AsyncTransport`]) flavour.
//! - [`Connection`]: a transport plus the read-ahead and output buffers the
//!   serializer decodes from and encodes into.
//! - [`serializer`]: the byte-exact encoding of booleans, integers, strings,
//!   packed values and lists.
//! - [`Request`] and [`Response`]: the messages, each a varint tag followed
//!   by its fields.
//!
//! # Session lifecycle
//!
//! The [`Acceptor`] thread blocks in `accept()` and hands every socket to the
//! scheduler thread. There the [`Server`] wraps the socket in an
//! [`AsyncTransport`] and spawns one task per connection. The task exchanges
//! the 8-byte handshake, then loops reading a request, writing its response
//! and yielding if its time slice has run out.
//!
//! Reads and writes look blocking to the task; when the socket is not ready
//! the task blocks and the scheduler resumes it once the reactor reports
//! progress.
//!
//! # Binary Format
//!
//! There is no framing below the serializer. A session starts with
//! [`HANDSHAKE`] sent by the client and echoed by the server. Every message
//! after that is a varint tag followed by the fields listed on its variant:
//!
//! | tag | request        | response        |
//! |-----|----------------|-----------------|
//! | 0   | `Ping`         | `Pong`          |
//! | 1   | `Echo(value)`  | `Echo(value)`   |
//! | 2   | `Put{key,val}` | `Stored`        |
//! | 3   | `Get{key}`     | `Found(val)`    |
//! | 4   | `Sleep{ms}`    | `Missing`       |
//! | 5   | `Close`        | `Slept`         |
//! | 6   |                | `Closed`        |
//! | 7   |                | `Err{code,msg}` |
//!
//! Echoed values carry their [`WireKind`] ahead of the value, so the
//! receiver can decode values whose shape it does not know in advance.
//!
//! # See Also
//!
//! - [`scheduler`](crate::scheduler): runs the per-connection tasks.
//! - [`engine`](crate::engine): stores the values sent with `Put`.
mod acceptor;
mod client;
mod connection;
mod handshake;
mod request;
mod response;
pub mod serializer;
mod server;
pub mod transport;
mod value;

pub use acceptor::{Acceptor, MAX_ACCEPT_RETRIES};
pub use client::{Client, FatalHandler, exit_on_fatal};
pub use connection::{Connection, MIN_READ_CHUNK};
pub use handshake::{HANDSHAKE, HANDSHAKE_SIZE, client_handshake, server_handshake};
pub use request::Request;
pub use response::{ErrorCode, Response};
pub use serializer::WireError;
pub use server::{ADMIN_TICK, Server, ServerError, SessionInfo, ShutdownHandle};
pub use transport::{
    AsyncTransport, BlockingTransport, DEFAULT_MAX_WRITE, SessionCloser, Transport, TransportError,
};
pub use value::{MAX_LIST_DEPTH, PackedValue, WireKind, WireType, WireValue};
