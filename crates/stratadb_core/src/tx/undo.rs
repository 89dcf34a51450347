//! Undo log keys and records.

use crate::tx::version::VersionedValue;
use stratadb_codec::{CodecError, CodecResult, Decoder, Encoder, KeyCodec};

/// Operation kinds recorded in the undo log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpKind {
    /// The write deleted an existing entry (wrote a tombstone).
    Remove = 0,
    /// The write created an entry where none was visible.
    Add = 1,
    /// The write replaced an existing entry (or a tombstone).
    Set = 2,
}

impl OpKind {
    /// Converts a byte to an operation kind.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Remove),
            1 => Some(Self::Add),
            2 => Some(Self::Set),
            _ => None,
        }
    }

    /// Converts the operation kind to a byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One undo log entry: everything needed to revert a single write.
///
/// Keyed by `(tx_id, log_id)`, so one transaction's entries form a
/// dense, ordered range. `old_value` is the versioned value the slot
/// held before the write; `None` means the slot was empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRecord {
    /// What kind of write produced this entry.
    pub op: OpKind,
    /// Id of the map the write touched.
    pub map_id: u32,
    /// The encoded key the write touched.
    pub key: Vec<u8>,
    /// The slot content before the write, if any.
    pub old_value: Option<VersionedValue>,
}

impl UndoRecord {
    /// Encodes the record.
    ///
    /// Each of the four fields is a presence byte followed by the field
    /// bytes; only `old_value` can actually be absent.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_u8(1);
        enc.write_u8(self.op.as_u8());
        enc.write_u8(1);
        enc.write_varu64(u64::from(self.map_id));
        enc.write_u8(1);
        enc.write_len_bytes(&self.key);
        enc.write_opt(self.old_value.as_ref(), |enc, value| value.encode(enc));
        enc.into_bytes()
    }

    /// Decodes a record from a complete buffer.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut dec = Decoder::new(bytes);
        let op = dec
            .read_opt(|d| d.read_u8())?
            .ok_or_else(|| CodecError::invalid_structure("undo record without op kind"))?;
        let op = OpKind::from_u8(op)
            .ok_or_else(|| CodecError::invalid_structure(format!("invalid op kind {op}")))?;
        let map_id = dec
            .read_opt(Decoder::read_varu32)?
            .ok_or_else(|| CodecError::invalid_structure("undo record without map id"))?;
        let key = dec
            .read_opt(|d| d.read_len_bytes().map(<[u8]>::to_vec))?
            .ok_or_else(|| CodecError::invalid_structure("undo record without key"))?;
        let old_value = dec.read_opt(VersionedValue::decode)?;
        dec.expect_end()?;
        Ok(Self {
            op,
            map_id,
            key,
            old_value,
        })
    }
}

/// Encodes an undo log key for `(tx_id, log_id)`.
///
/// Both components use the order-preserving varint, so one
/// transaction's entries are contiguous and ordered by log id.
#[must_use]
pub fn undo_key(tx_id: u64, log_id: u64) -> Vec<u8> {
    (tx_id, log_id).key_bytes()
}

/// Decodes an undo log key back into `(tx_id, log_id)`.
pub fn decode_undo_key(bytes: &[u8]) -> CodecResult<(u64, u64)> {
    <(u64, u64)>::from_key_bytes(bytes)
}
