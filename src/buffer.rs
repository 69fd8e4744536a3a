//! Growable byte buffer shared by every layer of the connection stack.
//!
//! A [`Buffer`] keeps two cursors over one [`BytesMut`]: `used`, the write
//! position, and `pos`, the read position. Bytes in `pos..used` are unread;
//! bytes before `pos` have been consumed and can be reclaimed with
//! [`Buffer::remove`].
//!
//! # Growth
//!
//! When a write does not fit, the capacity doubles. If doubling is still not
//! enough the buffer grows to the exact size required. Growth never moves the
//! cursors and never discards unread bytes.
//!
//! # Ownership
//!
//! Buffers are never shared: the transport owns its read and write buffers,
//! the connection owns its read-ahead and output buffers.
use std::io::{self, Read};

use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::VarIntSupportMut;

/// Capacity of the first allocation made by an empty buffer.
const INITIAL_CAPACITY: usize = 64;

#[derive(Debug, Default, Clone)]
pub struct Buffer {
    /// Holds `0..used`; its length is the write position.
    data: BytesMut,
    pos: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Write position.
    pub fn used(&self) -> usize {
        self.data.len()
    }

    /// Read position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn available(&self) -> usize {
        self.used() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn unread(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Makes room for at least `extra` more bytes after `used`.
    pub fn reserve(&mut self, extra: usize) {
        let needed = self.used() + extra;
        if needed <= self.capacity() {
            return;
        }

        let doubled = (self.capacity() * 2).max(INITIAL_CAPACITY);
        let capacity = doubled.max(needed);
        self.data.reserve(capacity - self.used());
    }

    /// Reads once from `reader` into the space after `used`, accepting at
    /// most `max` bytes. Returns what `reader` returned.
    pub fn read_from(&mut self, reader: &mut impl Read, max: usize) -> io::Result<usize> {
        self.reserve(max);
        let start = self.used();
        self.data.resize(start + max, 0);

        let result = reader.read(&mut self.data[start..]);
        let read = result.as_ref().map_or(0, |&n| n);
        self.data.truncate(start + read);
        result
    }

    pub fn put(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data.put_slice(bytes);
    }

    pub fn put_u8(&mut self, byte: u8) {
        self.reserve(1);
        self.data.put_u8(byte);
    }

    /// Appends `value` as a base-128 varint.
    pub fn put_u64_varint(&mut self, value: u64) {
        self.reserve(10);
        self.data.put_u64_varint(value);
    }

    /// Appends `value` zigzag mapped, then as a base-128 varint.
    pub fn put_i64_varint(&mut self, value: i64) {
        self.reserve(10);
        self.data.put_i64_varint(value);
    }

    pub fn get_u8(&mut self) -> Option<u8> {
        let byte = *self.unread().first()?;
        self.pos += 1;
        Some(byte)
    }

    /// Returns the next `n` unread bytes and marks them consumed, or `None`
    /// if fewer than `n` are available.
    pub fn take(&mut self, n: usize) -> Option<&[u8]> {
        if self.available() < n {
            return None;
        }
        let start = self.pos;
        self.pos += n;
        Some(&self.data[start..start + n])
    }

    /// Marks `n` unread bytes as consumed.
    ///
    /// # Panics
    /// If fewer than `n` bytes are unread.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.available(), "consume past write position");
        self.pos += n;
    }

    /// Compacts the buffer, discarding consumed bytes and moving unread
    /// bytes to the front.
    pub fn remove(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.data.advance(self.pos);
        self.pos = 0;
    }

    /// Drops all content, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    /// Position of `byte` among the unread bytes, relative to `pos`.
    pub fn find(&self, byte: u8) -> Option<usize> {
        self.unread().iter().position(|&b| b == byte)
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            pos: 0,
        }
    }
}
