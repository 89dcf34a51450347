//! Versioned map slots.

use stratadb_codec::{CodecResult, Decoder, Encoder};

/// The value stored in every slot of a transactional map.
///
/// A slot never holds a bare payload: it always records which
/// transaction wrote it and at which log position, so readers can
/// decide visibility and walk back through the undo log. A `None`
/// payload is a tombstone: the owning transaction deleted the entry,
/// but the slot stays in place so other transactions can still trace
/// the previous version while the deletion is uncommitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// Id of the transaction that wrote this version.
    pub tx_id: u64,
    /// The writer's log id at the time of the write.
    pub log_id: u64,
    /// The payload; `None` marks a tombstone.
    pub payload: Option<Vec<u8>>,
}

impl VersionedValue {
    /// Creates a versioned value.
    #[must_use]
    pub fn new(tx_id: u64, log_id: u64, payload: Option<Vec<u8>>) -> Self {
        Self {
            tx_id,
            log_id,
            payload,
        }
    }

    /// Returns true if this version marks a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    /// Encodes into `enc`: varint transaction id, varint log id, then
    /// the payload behind a presence byte with its own length, so the
    /// value nests inside undo records.
    pub fn encode(&self, enc: &mut Encoder) {
        enc.write_varu64(self.tx_id);
        enc.write_varu64(self.log_id);
        enc.write_opt(self.payload.as_deref(), |enc, bytes| {
            enc.write_len_bytes(bytes);
        });
    }

    /// Decodes a versioned value from `dec`.
    pub fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let tx_id = dec.read_varu64()?;
        let log_id = dec.read_varu64()?;
        let payload = dec
            .read_opt(|d| d.read_len_bytes().map(<[u8]>::to_vec))?;
        Ok(Self {
            tx_id,
            log_id,
            payload,
        })
    }

    /// Encodes into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }

    /// Decodes from a complete buffer, rejecting trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut dec = Decoder::new(bytes);
        let value = Self::decode(&mut dec)?;
        dec.expect_end()?;
        Ok(value)
    }
}
