//! Byte-exact wire encoding.
//!
//! Encoders are free functions that append to an output [`Buffer`]. Decoders
//! are methods on [`Connection`] and pull every byte through
//! [`Connection::need`], so a decoder never reads past what the peer sent.
//!
//! # Formats
//!
//! - bool: one byte, `0` or `1`.
//! - integer: zigzag mapped, then a base-128 varint. Seven bits per byte,
//!   least significant group first, high bit set on every byte but the
//!   last. At most [`MAX_VARINT_LEN`] bytes.
//! - bytes and strings: varint length, then the raw bytes. Strings are UTF-8.
//! - packed value: varint length, then the packed bytes.
//! - list: varint element count, then the elements, all of one kind.
//!
//! Lengths and counts above [`MAX_FIELD_LEN`] are rejected in both
//! directions.
use std::string::FromUtf8Error;

use bytes_varint::{VarIntResult, VarIntSupport};
use thiserror::Error;

use crate::Buffer;

use super::{
    Connection,
    transport::{Transport, TransportError},
    value::{PackedValue, WireKind, WireType},
};

/// Longest encoding of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Largest length prefix accepted for bytes, strings, packed values and
/// lists.
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    #[error("malformed varint")]
    MalformedVarint,

    #[error("length {length} exceeds the {limit} byte limit")]
    LengthOverflow { length: u64, limit: usize },

    #[error("invalid UTF-8 string: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("unknown {what} tag {tag}")]
    UnknownTag { what: &'static str, tag: u64 },

    #[error("list of {expected} holds a {found} value")]
    MixedList { expected: WireKind, found: WireKind },

    #[error("lists nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("handshake mismatch")]
    Handshake,

    #[error("failed to pack value: {0}")]
    Pack(#[from] bincode::error::EncodeError),

    #[error("failed to unpack value: {0}")]
    Unpack(#[from] bincode::error::DecodeError),
}

impl WireError {
    pub fn is_lost_connection(&self) -> bool {
        matches!(self, WireError::Transport(TransportError::LostConnection))
    }
}

pub fn put_varint(out: &mut Buffer, value: u64) {
    out.put_u64_varint(value);
}

pub fn put_int(out: &mut Buffer, value: i64) {
    out.put_i64_varint(value);
}

pub fn put_bool(out: &mut Buffer, value: bool) {
    out.put_u8(u8::from(value));
}

pub fn put_len(out: &mut Buffer, len: usize) -> Result<(), WireError> {
    if len > MAX_FIELD_LEN {
        return Err(WireError::LengthOverflow {
            length: len as u64,
            limit: MAX_FIELD_LEN,
        });
    }
    put_varint(out, len as u64);
    Ok(())
}

pub fn put_bytes(out: &mut Buffer, bytes: &[u8]) -> Result<(), WireError> {
    put_len(out, bytes.len())?;
    out.put(bytes);
    Ok(())
}

pub fn put_str(out: &mut Buffer, s: &str) -> Result<(), WireError> {
    put_bytes(out, s.as_bytes())
}

pub fn put_packed(out: &mut Buffer, value: &PackedValue) -> Result<(), WireError> {
    put_bytes(out, value.as_bytes())
}

pub fn put_list<V: WireType>(out: &mut Buffer, items: &[V]) -> Result<(), WireError> {
    put_len(out, items.len())?;
    items.iter().try_for_each(|item| item.encode(out))
}

impl<T: Transport> Connection<T> {
    async fn get_u8(&mut self) -> Result<u8, WireError> {
        self.need(1).await?;
        Ok(self
            .inbuf
            .get_u8()
            .ok_or(TransportError::LostConnection)?)
    }

    /// Buffers input until a whole varint, or [`MAX_VARINT_LEN`] bytes of
    /// one, is unread, then decodes it with `decode`.
    async fn get_varint_with<V>(
        &mut self,
        decode: fn(&mut &[u8]) -> VarIntResult<V>,
    ) -> Result<V, WireError> {
        loop {
            let unread = self.inbuf.unread();
            let buffered = unread.len();
            let terminated = unread.iter().any(|byte| byte & 0x80 == 0);

            if terminated || buffered >= MAX_VARINT_LEN {
                let mut cursor = unread;
                let value = decode(&mut cursor).map_err(|_| WireError::MalformedVarint)?;
                let read = buffered - cursor.len();
                self.inbuf.consume(read);
                return Ok(value);
            }
            self.need(buffered + 1).await?;
        }
    }

    pub async fn get_varint(&mut self) -> Result<u64, WireError> {
        self.get_varint_with(|buf| buf.try_get_u64_varint()).await
    }

    pub async fn get_int(&mut self) -> Result<i64, WireError> {
        self.get_varint_with(|buf| buf.try_get_i64_varint()).await
    }

    pub async fn get_bool(&mut self) -> Result<bool, WireError> {
        match self.get_u8().await? {
            0 => Ok(false),
            1 => Ok(true),
            byte => Err(WireError::InvalidBool(byte)),
        }
    }

    pub async fn get_len(&mut self) -> Result<usize, WireError> {
        let length = self.get_varint().await?;
        if length > MAX_FIELD_LEN as u64 {
            return Err(WireError::LengthOverflow {
                length,
                limit: MAX_FIELD_LEN,
            });
        }
        Ok(length as usize)
    }

    pub async fn get_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.get_len().await?;
        Ok(self.read_exact(len).await?)
    }

    pub async fn get_string(&mut self) -> Result<String, WireError> {
        let bytes = self.get_bytes().await?;
        Ok(String::from_utf8(bytes)?)
    }

    pub async fn get_packed(&mut self) -> Result<PackedValue, WireError> {
        Ok(PackedValue::from(self.get_bytes().await?))
    }

    pub async fn get_list<V: WireType>(&mut self) -> Result<Vec<V>, WireError> {
        let count = self.get_len().await?;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(V::decode(self).await?);
        }
        Ok(items)
    }

    pub async fn get<V: WireType>(&mut self) -> Result<V, WireError> {
        V::decode(self).await
    }

    /// Encodes `value` into the output buffer.
    pub fn put<V: WireType>(&mut self, value: &V) -> Result<(), WireError> {
        value.encode(&mut self.outbuf)
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::transport::memory::{MemoryTransport, run};

    use super::*;

    fn connection(bytes: &[u8]) -> Connection<MemoryTransport> {
        Connection::new(MemoryTransport::new([bytes.to_vec()]))
    }

    fn encoded(value: i64) -> Vec<u8> {
        let mut out = Buffer::new();
        put_int(&mut out, value);
        out.unread().to_vec()
    }

    #[test]
    fn small_magnitudes_encode_to_small_codes() {
        assert_eq!(encoded(-1), [0x01]);
        assert_eq!(encoded(1), [0x02]);
        assert_eq!(encoded(-64), [0x7F]);
        assert_eq!(encoded(64), [0x80, 0x01]);
        assert_eq!(
            encoded(i64::MIN),
            [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]
        );
    }

    #[test]
    fn known_encoding() {
        assert_eq!(encoded(-12345), [0xF1, 0xC0, 0x01]);
        assert_eq!(encoded(0), [0x00]);
    }

    #[test]
    fn integer_extremes_round_trip() {
        for value in [0, -1, 1, i64::MIN, i64::MAX, -12345, 1 << 40] {
            let bytes = encoded(value);
            assert!(bytes.len() <= MAX_VARINT_LEN);

            let mut conn = connection(&bytes);
            assert_eq!(run(conn.get_int()).unwrap(), value);
        }
        assert_eq!(encoded(i64::MIN).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn strings_round_trip() {
        for s in ["", "hello", "snowman \u{2603}"] {
            let mut out = Buffer::new();
            put_str(&mut out, s).unwrap();

            let mut conn = connection(out.unread());
            assert_eq!(run(conn.get_string()).unwrap(), s);
        }
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let mut conn = connection(&[0, 1, 2]);

        run(async {
            assert!(!conn.get_bool().await.unwrap());
            assert!(conn.get_bool().await.unwrap());
            assert!(matches!(
                conn.get_bool().await,
                Err(WireError::InvalidBool(2))
            ));
        });
    }

    #[test]
    fn overlong_varints_are_malformed() {
        let mut conn = connection(&[0xFF; 11]);
        assert!(matches!(
            run(conn.get_varint()),
            Err(WireError::MalformedVarint)
        ));

        let mut tenth_overflows = vec![0xFF; 9];
        tenth_overflows.push(0x02);
        let mut conn = connection(&tenth_overflows);
        assert!(matches!(
            run(conn.get_varint()),
            Err(WireError::MalformedVarint)
        ));
    }

    #[test]
    fn varint_bytes_after_the_value_stay_buffered() {
        let mut conn = connection(&[0xAC, 0x02, 0x07]);

        run(async {
            assert_eq!(conn.get_varint().await.unwrap(), 300);
            assert_eq!(conn.buffered(), 1);
            assert_eq!(conn.get_int().await.unwrap(), -4);
        });
    }

    #[test]
    fn truncated_varint_is_lost_connection() {
        let mut conn = connection(&[0x80, 0x80]);

        let err = run(conn.get_varint()).unwrap_err();
        assert!(err.is_lost_connection());
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        let mut out = Buffer::new();
        put_varint(&mut out, MAX_FIELD_LEN as u64 + 1);

        let mut conn = connection(out.unread());
        assert!(matches!(
            run(conn.get_bytes()),
            Err(WireError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut out = Buffer::new();
        put_bytes(&mut out, &[0xC3, 0x28]).unwrap();

        let mut conn = connection(out.unread());
        assert!(matches!(run(conn.get_string()), Err(WireError::Utf8(_))));
    }

    #[test]
    fn lists_of_lists() {
        let value = vec![vec![1_i64, -2, 3], vec![], vec![i64::MAX]];
        let mut out = Buffer::new();
        put_list(&mut out, &value).unwrap();

        let mut conn = connection(out.unread());
        assert_eq!(run(conn.get::<Vec<Vec<i64>>>()).unwrap(), value);
    }

    #[test]
    fn decoding_waits_for_split_input() {
        let mut out = Buffer::new();
        put_str(&mut out, "split across reads").unwrap();
        put_int(&mut out, -12345);
        let (head, tail) = out.unread().split_at(5);

        let mut conn = Connection::new(MemoryTransport::new([head.to_vec(), tail.to_vec()]));
        run(async {
            assert_eq!(conn.get_string().await.unwrap(), "split across reads");
            assert_eq!(conn.get_int().await.unwrap(), -12345);
        });
    }
}
