//! Byte-oriented encoder.

use crate::varint::{write_ordered_u64, write_varu64};

/// An append-only byte encoder.
///
/// All multi-byte primitives are written in a single canonical form, so
/// encoding the same value twice yields identical bytes.
#[derive(Debug, Default)]
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    /// Creates a new empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder with `capacity` bytes preallocated.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Consumes the encoder and returns the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Returns the bytes encoded so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Returns the number of bytes encoded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been encoded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buffer.push(v);
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes an LEB128 varint.
    pub fn write_varu64(&mut self, v: u64) {
        write_varu64(&mut self.buffer, v);
    }

    /// Writes an order-preserving varint.
    pub fn write_ordered_u64(&mut self, v: u64) {
        write_ordered_u64(&mut self.buffer, v);
    }

    /// Writes a varint length followed by the bytes.
    pub fn write_len_bytes(&mut self, bytes: &[u8]) {
        self.write_varu64(bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a string as a varint length followed by its UTF-8 bytes.
    pub fn write_str(&mut self, s: &str) {
        self.write_len_bytes(s.as_bytes());
    }

    /// Writes a presence byte (`1`/`0`); when present, hands the
    /// encoder to `write` for the field bytes.
    ///
    /// This is the per-element form of the composite record codec: every
    /// field of a record is a presence byte followed by the field bytes.
    /// Counterpart of [`crate::Decoder::read_opt`].
    pub fn write_opt<T: ?Sized>(
        &mut self,
        value: Option<&T>,
        write: impl FnOnce(&mut Self, &T),
    ) {
        match value {
            Some(value) => {
                self.write_u8(1);
                write(self, value);
            }
            None => self.write_u8(0),
        }
    }
}
