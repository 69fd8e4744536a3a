use std::{fmt, future::Future, pin::Pin};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
};

use crate::Buffer;

use super::{
    Connection,
    serializer::{WireError, put_bool, put_bytes, put_int, put_len, put_list, put_packed, put_str, put_varint},
    transport::Transport,
};

/// Deepest list nesting accepted in a value kind.
pub const MAX_LIST_DEPTH: usize = 32;

/// A type with a wire encoding.
pub trait WireType: Sized {
    fn encode(&self, out: &mut Buffer) -> Result<(), WireError>;

    fn decode<T: Transport>(
        conn: &mut Connection<T>,
    ) -> impl Future<Output = Result<Self, WireError>>;
}

impl WireType for bool {
    fn encode(&self, out: &mut Buffer) -> Result<(), WireError> {
        put_bool(out, *self);
        Ok(())
    }

    fn decode<T: Transport>(conn: &mut Connection<T>) -> impl Future<Output = Result<Self, WireError>> {
        conn.get_bool()
    }
}

impl WireType for i64 {
    fn encode(&self, out: &mut Buffer) -> Result<(), WireError> {
        put_int(out, *self);
        Ok(())
    }

    fn decode<T: Transport>(conn: &mut Connection<T>) -> impl Future<Output = Result<Self, WireError>> {
        conn.get_int()
    }
}

impl WireType for String {
    fn encode(&self, out: &mut Buffer) -> Result<(), WireError> {
        put_str(out, self)
    }

    fn decode<T: Transport>(conn: &mut Connection<T>) -> impl Future<Output = Result<Self, WireError>> {
        conn.get_string()
    }
}

impl WireType for PackedValue {
    fn encode(&self, out: &mut Buffer) -> Result<(), WireError> {
        put_packed(out, self)
    }

    fn decode<T: Transport>(conn: &mut Connection<T>) -> impl Future<Output = Result<Self, WireError>> {
        conn.get_packed()
    }
}

impl<V: WireType> WireType for Vec<V> {
    fn encode(&self, out: &mut Buffer) -> Result<(), WireError> {
        put_list(out, self)
    }

    fn decode<T: Transport>(conn: &mut Connection<T>) -> impl Future<Output = Result<Self, WireError>> {
        conn.get_list()
    }
}

fn pack_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Opaque, already-encoded domain value.
///
/// The wire carries it as length-prefixed bytes; [`PackedValue::pack`] and
/// [`PackedValue::unpack`] convert to and from any `bincode` type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PackedValue(Vec<u8>);

impl PackedValue {
    pub fn pack<V: Encode>(value: &V) -> Result<Self, WireError> {
        Ok(Self(bincode::encode_to_vec(value, pack_config())?))
    }

    pub fn unpack<V: Decode<()>>(&self) -> Result<V, WireError> {
        let (value, _) = bincode::decode_from_slice(&self.0, pack_config())?;
        Ok(value)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for PackedValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<PackedValue> for Vec<u8> {
    fn from(value: PackedValue) -> Self {
        value.0
    }
}

/// Shape of a [`WireValue`], sent ahead of it so the receiver knows how to
/// decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireKind {
    Bool,
    Int,
    Bytes,
    Packed,
    List(Box<WireKind>),
}

impl WireKind {
    const BOOL: u64 = 0;
    const INT: u64 = 1;
    const BYTES: u64 = 2;
    const PACKED: u64 = 3;
    const LIST: u64 = 4;

    pub fn list_of(kind: WireKind) -> Self {
        WireKind::List(Box::new(kind))
    }

    pub fn encode(&self, out: &mut Buffer) {
        let mut kind = self;
        while let WireKind::List(inner) = kind {
            put_varint(out, Self::LIST);
            kind = inner;
        }
        let tag = match kind {
            WireKind::Bool => Self::BOOL,
            WireKind::Int => Self::INT,
            WireKind::Bytes => Self::BYTES,
            WireKind::Packed => Self::PACKED,
            WireKind::List(_) => unreachable!("lists are unwrapped above"),
        };
        put_varint(out, tag);
    }
}

impl fmt::Display for WireKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireKind::Bool => f.write_str("bool"),
            WireKind::Int => f.write_str("int"),
            WireKind::Bytes => f.write_str("bytes"),
            WireKind::Packed => f.write_str("packed"),
            WireKind::List(inner) => write!(f, "list<{inner}>"),
        }
    }
}

/// Dynamically typed wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
    Packed(PackedValue),
    /// Homogeneous list; `kind` is the element kind.
    List { kind: WireKind, items: Vec<WireValue> },
}

impl WireValue {
    pub fn kind(&self) -> WireKind {
        match self {
            WireValue::Bool(_) => WireKind::Bool,
            WireValue::Int(_) => WireKind::Int,
            WireValue::Bytes(_) => WireKind::Bytes,
            WireValue::Packed(_) => WireKind::Packed,
            WireValue::List { kind, .. } => WireKind::list_of(kind.clone()),
        }
    }

    /// Encodes the kind followed by the value.
    pub fn encode(&self, out: &mut Buffer) -> Result<(), WireError> {
        self.kind().encode(out);
        self.encode_payload(out)
    }

    fn encode_payload(&self, out: &mut Buffer) -> Result<(), WireError> {
        match self {
            WireValue::Bool(b) => put_bool(out, *b),
            WireValue::Int(n) => put_int(out, *n),
            WireValue::Bytes(bytes) => put_bytes(out, bytes)?,
            WireValue::Packed(packed) => put_packed(out, packed)?,
            WireValue::List { kind, items } => {
                put_len(out, items.len())?;
                for item in items {
                    let found = item.kind();
                    if found != *kind {
                        return Err(WireError::MixedList {
                            expected: kind.clone(),
                            found,
                        });
                    }
                    item.encode_payload(out)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::Bool(b) => write!(f, "{b}"),
            WireValue::Int(n) => write!(f, "{n}"),
            WireValue::Bytes(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            WireValue::Packed(packed) => write!(f, "<packed, {} bytes>", packed.len()),
            WireValue::List { items, .. } => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl<T: Transport> Connection<T> {
    pub async fn get_kind(&mut self) -> Result<WireKind, WireError> {
        let mut depth = 0;
        let base = loop {
            match self.get_varint().await? {
                WireKind::BOOL => break WireKind::Bool,
                WireKind::INT => break WireKind::Int,
                WireKind::BYTES => break WireKind::Bytes,
                WireKind::PACKED => break WireKind::Packed,
                WireKind::LIST if depth < MAX_LIST_DEPTH => depth += 1,
                WireKind::LIST => return Err(WireError::TooDeep(MAX_LIST_DEPTH)),
                tag => {
                    return Err(WireError::UnknownTag {
                        what: "value kind",
                        tag,
                    });
                }
            }
        };
        Ok((0..depth).fold(base, |kind, _| WireKind::list_of(kind)))
    }

    /// Decodes a value of the given kind.
    pub fn get_value_of<'a>(
        &'a mut self,
        kind: &'a WireKind,
    ) -> Pin<Box<dyn Future<Output = Result<WireValue, WireError>> + 'a>> {
        Box::pin(async move {
            let value = match kind {
                WireKind::Bool => WireValue::Bool(self.get_bool().await?),
                WireKind::Int => WireValue::Int(self.get_int().await?),
                WireKind::Bytes => WireValue::Bytes(self.get_bytes().await?),
                WireKind::Packed => WireValue::Packed(self.get_packed().await?),
                WireKind::List(inner) => {
                    let count = self.get_len().await?;
                    let mut items = Vec::with_capacity(count.min(1024));
                    for _ in 0..count {
                        items.push(self.get_value_of(inner).await?);
                    }
                    WireValue::List {
                        kind: (**inner).clone(),
                        items,
                    }
                }
            };
            Ok(value)
        })
    }

    /// Decodes a kind followed by a value of that kind.
    pub async fn get_value(&mut self) -> Result<WireValue, WireError> {
        let kind = self.get_kind().await?;
        self.get_value_of(&kind).await
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::transport::memory::{MemoryTransport, run};

    use super::*;

    #[derive(Debug, PartialEq, Encode, Decode)]
    struct Account {
        id: u64,
        name: String,
    }

    fn decode_value(out: &Buffer) -> Result<WireValue, WireError> {
        let mut conn = Connection::new(MemoryTransport::new([out.unread().to_vec()]));
        run(conn.get_value())
    }

    #[test]
    fn packed_values_use_big_endian_fixed_ints() {
        let account = Account {
            id: 7,
            name: "ada".into(),
        };
        let packed = PackedValue::pack(&account).unwrap();

        assert_eq!(&packed.as_bytes()[..8], &7_u64.to_be_bytes());
        assert_eq!(packed.unpack::<Account>().unwrap(), account);
    }

    #[test]
    fn nested_list_values_round_trip() {
        let value = WireValue::List {
            kind: WireKind::list_of(WireKind::Int),
            items: vec![
                WireValue::List {
                    kind: WireKind::Int,
                    items: vec![WireValue::Int(1), WireValue::Int(-2)],
                },
                WireValue::List {
                    kind: WireKind::Int,
                    items: vec![],
                },
            ],
        };
        let mut out = Buffer::new();
        value.encode(&mut out).unwrap();

        assert_eq!(&out.unread()[..3], &[4, 4, 1]);
        assert_eq!(decode_value(&out).unwrap(), value);
        assert_eq!(value.to_string(), "[[1, -2], []]");
    }

    #[test]
    fn mixed_lists_are_rejected() {
        let value = WireValue::List {
            kind: WireKind::Int,
            items: vec![WireValue::Int(1), WireValue::Bool(true)],
        };

        let err = value.encode(&mut Buffer::new()).unwrap_err();
        assert!(matches!(
            err,
            WireError::MixedList {
                expected: WireKind::Int,
                found: WireKind::Bool
            }
        ));
    }

    #[test]
    fn unknown_kind_tag() {
        let mut out = Buffer::new();
        put_varint(&mut out, 9);

        assert!(matches!(
            decode_value(&out),
            Err(WireError::UnknownTag { tag: 9, .. })
        ));
    }

    #[test]
    fn nesting_is_bounded() {
        let mut out = Buffer::new();
        for _ in 0..=MAX_LIST_DEPTH {
            put_varint(&mut out, 4);
        }
        put_varint(&mut out, 1);

        assert!(matches!(decode_value(&out), Err(WireError::TooDeep(_))));
    }
}
