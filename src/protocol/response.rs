use std::{fmt, future::Future};

use crate::Buffer;

use super::{
    Connection,
    serializer::{WireError, put_str, put_varint},
    transport::Transport,
    value::{PackedValue, WireType, WireValue},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Pong,
    Echo(WireValue),
    Stored,
    Found(PackedValue),
    Missing,
    Slept,
    Closed,
    Err {
        code: ErrorCode,
        description: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The request itself was unacceptable.
    Request,
    /// The engine failed to carry out the request.
    Engine,
}

impl Response {
    const PONG: u64 = 0;
    const ECHO: u64 = 1;
    const STORED: u64 = 2;
    const FOUND: u64 = 3;
    const MISSING: u64 = 4;
    const SLEPT: u64 = 5;
    const CLOSED: u64 = 6;
    const ERR: u64 = 7;

    pub fn error(code: ErrorCode, description: impl Into<String>) -> Self {
        Response::Err {
            code,
            description: description.into(),
        }
    }
}

impl WireType for Response {
    fn encode(&self, out: &mut Buffer) -> Result<(), WireError> {
        match self {
            Response::Pong => put_varint(out, Self::PONG),
            Response::Echo(value) => {
                put_varint(out, Self::ECHO);
                value.encode(out)?;
            }
            Response::Stored => put_varint(out, Self::STORED),
            Response::Found(value) => {
                put_varint(out, Self::FOUND);
                value.encode(out)?;
            }
            Response::Missing => put_varint(out, Self::MISSING),
            Response::Slept => put_varint(out, Self::SLEPT),
            Response::Closed => put_varint(out, Self::CLOSED),
            Response::Err { code, description } => {
                put_varint(out, Self::ERR);
                put_varint(out, *code as u64);
                put_str(out, description)?;
            }
        }
        Ok(())
    }

    fn decode<T: Transport>(conn: &mut Connection<T>) -> impl Future<Output = Result<Self, WireError>> {
        async move {
            let response = match conn.get_varint().await? {
                Self::PONG => Response::Pong,
                Self::ECHO => Response::Echo(conn.get_value().await?),
                Self::STORED => Response::Stored,
                Self::FOUND => Response::Found(conn.get_packed().await?),
                Self::MISSING => Response::Missing,
                Self::SLEPT => Response::Slept,
                Self::CLOSED => Response::Closed,
                Self::ERR => {
                    let code = match conn.get_varint().await? {
                        0 => ErrorCode::Request,
                        1 => ErrorCode::Engine,
                        tag => return Err(WireError::UnknownTag { what: "error code", tag }),
                    };
                    Response::Err {
                        code,
                        description: conn.get_string().await?,
                    }
                }
                tag => return Err(WireError::UnknownTag { what: "response", tag }),
            };
            Ok(response)
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Pong => f.write_str("pong"),
            Response::Echo(value) => write!(f, "{value}"),
            Response::Stored => f.write_str("stored"),
            Response::Found(value) => match value.unpack::<String>() {
                Ok(s) => write!(f, "{s:?}"),
                Err(_) => write!(f, "<{} bytes>", value.len()),
            },
            Response::Missing => f.write_str("(missing)"),
            Response::Slept => f.write_str("slept"),
            Response::Closed => f.write_str("connection closed"),
            Response::Err { code, description } => write!(f, "{code:?} error: {description}"),
        }
    }
}
