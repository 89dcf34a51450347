//! Key and value codec traits with primitive implementations.

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{CodecError, CodecResult};

/// Binary encoding for map keys.
///
/// Encoded keys must compare bytewise exactly as the decoded values
/// compare, because the backing maps order entries by raw bytes. Keys
/// occupy a whole map key on their own; composite keys are built from
/// self-delimiting elements (tuples of integers).
pub trait KeyCodec: Sized {
    /// Encodes this key into `enc`.
    fn encode_key(&self, enc: &mut Encoder);

    /// Decodes a key from `dec`.
    fn decode_key(dec: &mut Decoder<'_>) -> CodecResult<Self>;

    /// Encodes this key into a fresh buffer.
    fn key_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_key(&mut enc);
        enc.into_bytes()
    }

    /// Decodes a key from a complete buffer, rejecting trailing bytes.
    fn from_key_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut dec = Decoder::new(bytes);
        let key = Self::decode_key(&mut dec)?;
        dec.expect_end()?;
        Ok(key)
    }
}

/// Binary encoding for map values.
///
/// Values never participate in ordering, so the compact LEB128 forms
/// are used. The encoding is deterministic: byte equality of encoded
/// values is value equality.
pub trait ValueCodec: Sized {
    /// Encodes this value into `enc`.
    fn encode_value(&self, enc: &mut Encoder);

    /// Decodes a value from `dec`.
    fn decode_value(dec: &mut Decoder<'_>) -> CodecResult<Self>;

    /// Encodes this value into a fresh buffer.
    fn value_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_value(&mut enc);
        enc.into_bytes()
    }

    /// Decodes a value from a complete buffer, rejecting trailing bytes.
    fn from_value_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut dec = Decoder::new(bytes);
        let value = Self::decode_value(&mut dec)?;
        dec.expect_end()?;
        Ok(value)
    }
}

impl KeyCodec for u64 {
    fn encode_key(&self, enc: &mut Encoder) {
        enc.write_ordered_u64(*self);
    }

    fn decode_key(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.read_ordered_u64()
    }
}

impl ValueCodec for u64 {
    fn encode_value(&self, enc: &mut Encoder) {
        enc.write_varu64(*self);
    }

    fn decode_value(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.read_varu64()
    }
}

impl KeyCodec for u32 {
    fn encode_key(&self, enc: &mut Encoder) {
        enc.write_ordered_u64(u64::from(*self));
    }

    fn decode_key(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let v = dec.read_ordered_u64()?;
        u32::try_from(v).map_err(|_| CodecError::out_of_range(format!("{v} exceeds u32")))
    }
}

impl ValueCodec for u32 {
    fn encode_value(&self, enc: &mut Encoder) {
        enc.write_varu64(u64::from(*self));
    }

    fn decode_value(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.read_varu32()
    }
}

/// Composite integer key; both elements are self-delimiting and
/// order-preserving, so the pair orders lexicographically.
impl KeyCodec for (u64, u64) {
    fn encode_key(&self, enc: &mut Encoder) {
        enc.write_ordered_u64(self.0);
        enc.write_ordered_u64(self.1);
    }

    fn decode_key(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let first = dec.read_ordered_u64()?;
        let second = dec.read_ordered_u64()?;
        Ok((first, second))
    }
}

/// String keys are raw UTF-8 bytes: byte order equals `str` order.
/// A string key occupies the whole key buffer.
impl KeyCodec for String {
    fn encode_key(&self, enc: &mut Encoder) {
        enc.write_raw(self.as_bytes());
    }

    fn decode_key(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        std::str::from_utf8(dec.read_rest())
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

impl ValueCodec for String {
    fn encode_value(&self, enc: &mut Encoder) {
        enc.write_str(self);
    }

    fn decode_value(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.read_str()
    }
}

/// Byte-string keys are the raw bytes themselves and occupy the whole
/// key buffer.
impl KeyCodec for Vec<u8> {
    fn encode_key(&self, enc: &mut Encoder) {
        enc.write_raw(self);
    }

    fn decode_key(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(dec.read_rest().to_vec())
    }
}

impl ValueCodec for Vec<u8> {
    fn encode_value(&self, enc: &mut Encoder) {
        enc.write_len_bytes(self);
    }

    fn decode_value(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(dec.read_len_bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_key_roundtrip() {
        for v in [0u64, 1, 240, 300, 1 << 20, u64::MAX] {
            assert_eq!(u64::from_key_bytes(&v.key_bytes()).unwrap(), v);
        }
    }

    #[test]
    fn u64_key_bytes_order() {
        let values = [0u64, 1, 240, 241, 2288, 67824, 1 << 32, u64::MAX];
        let mut encoded: Vec<Vec<u8>> = values.iter().map(|v| v.key_bytes()).collect();
        encoded.sort();
        let decoded: Vec<u64> = encoded
            .iter()
            .map(|b| u64::from_key_bytes(b).unwrap())
            .collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn pair_key_roundtrip_and_order() {
        let a = (3u64, u64::MAX).key_bytes();
        let b = (4u64, 0u64).key_bytes();
        assert!(a < b);
        assert_eq!(
            <(u64, u64)>::from_key_bytes(&a).unwrap(),
            (3u64, u64::MAX)
        );
    }

    #[test]
    fn string_key_is_raw_bytes() {
        let key = "lastTransactionId".to_owned();
        assert_eq!(key.key_bytes(), b"lastTransactionId");
        assert_eq!(String::from_key_bytes(b"settings").unwrap(), "settings");
    }

    #[test]
    fn string_value_roundtrip() {
        let v = "named transaction".to_owned();
        assert_eq!(String::from_value_bytes(&v.value_bytes()).unwrap(), v);
    }

    #[test]
    fn bytes_value_roundtrip() {
        let v: Vec<u8> = vec![0, 255, 1, 128];
        assert_eq!(Vec::<u8>::from_value_bytes(&v.value_bytes()).unwrap(), v);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = 7u64.key_bytes();
        bytes.push(0);
        assert!(matches!(
            u64::from_key_bytes(&bytes),
            Err(CodecError::TrailingBytes { .. })
        ));
    }
}
