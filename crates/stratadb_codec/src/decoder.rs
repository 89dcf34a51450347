//! Byte-oriented decoder.

use crate::error::{CodecError, CodecResult};
use crate::varint::{read_ordered_u64, read_varu64};

/// A cursor over encoded bytes.
///
/// Every read advances the cursor; [`Decoder::expect_end`] asserts that
/// a value consumed its whole input.
#[derive(Debug)]
pub struct Decoder<'a> {
    input: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over `input`.
    #[must_use]
    pub fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    /// Returns the number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    /// Returns true if all input has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    /// Fails unless all input has been consumed.
    pub fn expect_end(&self) -> CodecResult<()> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                remaining: self.input.len(),
            })
        }
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        let (&first, rest) = self.input.split_first().ok_or(CodecError::UnexpectedEof)?;
        self.input = rest;
        Ok(first)
    }

    /// Reads exactly `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.input.len() < len {
            return Err(CodecError::UnexpectedEof);
        }
        let (bytes, rest) = self.input.split_at(len);
        self.input = rest;
        Ok(bytes)
    }

    /// Reads all remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.input)
    }

    /// Reads an LEB128 varint.
    pub fn read_varu64(&mut self) -> CodecResult<u64> {
        read_varu64(&mut self.input)
    }

    /// Reads an LEB128 varint that must fit in a `u32`.
    pub fn read_varu32(&mut self) -> CodecResult<u32> {
        let v = self.read_varu64()?;
        u32::try_from(v).map_err(|_| CodecError::out_of_range(format!("{v} exceeds u32")))
    }

    /// Reads an order-preserving varint.
    pub fn read_ordered_u64(&mut self) -> CodecResult<u64> {
        read_ordered_u64(&mut self.input)
    }

    /// Reads a varint length followed by that many bytes.
    pub fn read_len_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.read_varu64()?;
        let len = usize::try_from(len)
            .map_err(|_| CodecError::out_of_range(format!("length {len} exceeds usize")))?;
        self.read_raw(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> CodecResult<String> {
        let bytes = self.read_len_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads a presence byte; on `1` hands the decoder to `read`.
    ///
    /// Counterpart of [`crate::Encoder::write_opt`].
    pub fn read_opt<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> CodecResult<T>,
    ) -> CodecResult<Option<T>> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => read(self).map(Some),
            b => Err(CodecError::invalid_structure(format!(
                "invalid presence byte {b}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    #[test]
    fn reads_back_encoded_fields() {
        let mut enc = Encoder::new();
        enc.write_u8(7);
        enc.write_varu64(1 << 40);
        enc.write_ordered_u64(99_999);
        enc.write_str("settings");
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_u8().unwrap(), 7);
        assert_eq!(dec.read_varu64().unwrap(), 1 << 40);
        assert_eq!(dec.read_ordered_u64().unwrap(), 99_999);
        assert_eq!(dec.read_str().unwrap(), "settings");
        assert!(dec.expect_end().is_ok());
    }

    #[test]
    fn expect_end_flags_trailing_bytes() {
        let dec = Decoder::new(&[1, 2, 3]);
        assert_eq!(
            dec.expect_end(),
            Err(CodecError::TrailingBytes { remaining: 3 })
        );
    }

    #[test]
    fn read_opt_rejects_bad_presence_byte() {
        let mut dec = Decoder::new(&[2]);
        let result = dec.read_opt(|d| d.read_u8());
        assert!(matches!(result, Err(CodecError::InvalidStructure { .. })));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut enc = Encoder::new();
        enc.write_len_bytes(&[0xff, 0xfe]);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_str(), Err(CodecError::InvalidUtf8));
    }
}
