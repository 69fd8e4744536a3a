use std::future::Future;

use crate::{Buffer, Command};

use super::{
    Connection,
    serializer::{WireError, put_int, put_str, put_varint},
    transport::Transport,
    value::{PackedValue, WireType, WireValue},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    /// Asks the server to send the value straight back.
    Echo(WireValue),
    Put { key: String, value: PackedValue },
    Get { key: String },
    /// Asks the serving task to sleep, without holding up other sessions.
    Sleep { millis: i64 },
    Close,
}

impl Request {
    const PING: u64 = 0;
    const ECHO: u64 = 1;
    const PUT: u64 = 2;
    const GET: u64 = 3;
    const SLEEP: u64 = 4;
    const CLOSE: u64 = 5;
}

impl WireType for Request {
    fn encode(&self, out: &mut Buffer) -> Result<(), WireError> {
        match self {
            Request::Ping => put_varint(out, Self::PING),
            Request::Echo(value) => {
                put_varint(out, Self::ECHO);
                value.encode(out)?;
            }
            Request::Put { key, value } => {
                put_varint(out, Self::PUT);
                put_str(out, key)?;
                value.encode(out)?;
            }
            Request::Get { key } => {
                put_varint(out, Self::GET);
                put_str(out, key)?;
            }
            Request::Sleep { millis } => {
                put_varint(out, Self::SLEEP);
                put_int(out, *millis);
            }
            Request::Close => put_varint(out, Self::CLOSE),
        }
        Ok(())
    }

    fn decode<T: Transport>(conn: &mut Connection<T>) -> impl Future<Output = Result<Self, WireError>> {
        async move {
            let request = match conn.get_varint().await? {
                Self::PING => Request::Ping,
                Self::ECHO => Request::Echo(conn.get_value().await?),
                Self::PUT => Request::Put {
                    key: conn.get_string().await?,
                    value: conn.get_packed().await?,
                },
                Self::GET => Request::Get {
                    key: conn.get_string().await?,
                },
                Self::SLEEP => Request::Sleep {
                    millis: conn.get_int().await?,
                },
                Self::CLOSE => Request::Close,
                tag => return Err(WireError::UnknownTag { what: "request", tag }),
            };
            Ok(request)
        }
    }
}

impl TryFrom<Command> for Request {
    type Error = WireError;

    fn try_from(command: Command) -> Result<Self, Self::Error> {
        let request = match command {
            Command::Exit => Request::Close,
            Command::Ping => Request::Ping,
            Command::Echo(value) => Request::Echo(value),
            Command::Set { key, value } => Request::Put {
                key,
                value: PackedValue::pack(&value)?,
            },
            Command::Get { key } => Request::Get { key },
            Command::Sleep(millis) => Request::Sleep {
                millis: i64::try_from(millis).unwrap_or(i64::MAX),
            },
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::transport::memory::{MemoryTransport, run};

    use super::*;

    fn round_trip(request: &Request) -> Request {
        let mut out = Buffer::new();
        request.encode(&mut out).unwrap();

        let mut conn = Connection::new(MemoryTransport::new([out.unread().to_vec()]));
        run(conn.get::<Request>()).unwrap()
    }

    #[test]
    fn request_exit_command() {
        let request = Request::try_from(Command::Exit).unwrap();
        assert_eq!(request, Request::Close);
    }

    #[test]
    fn request_set_command_packs_value() {
        let command = Command::Set {
            key: "greeting".into(),
            value: "hello".into(),
        };
        let Request::Put { key, value } = Request::try_from(command).unwrap() else {
            panic!("expected a put request");
        };

        assert_eq!(key, "greeting");
        assert_eq!(value.unpack::<String>().unwrap(), "hello");
    }

    #[test]
    fn requests_survive_the_wire() {
        let requests = [
            Request::Ping,
            Request::Echo(WireValue::Bytes(b"abc".to_vec())),
            Request::Put {
                key: "k".into(),
                value: PackedValue::from(vec![1, 2, 3]),
            },
            Request::Get { key: String::new() },
            Request::Sleep { millis: 250 },
            Request::Close,
        ];

        for request in &requests {
            assert_eq!(&round_trip(request), request);
        }
    }

    #[test]
    fn ping_is_a_single_byte() {
        let mut out = Buffer::new();
        Request::Ping.encode(&mut out).unwrap();

        assert_eq!(out.unread(), [0]);
    }
}
