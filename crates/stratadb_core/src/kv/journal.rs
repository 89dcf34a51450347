//! Redo journal: framed records and batch replay.
//!
//! Every map mutation is buffered as a [`JournalRecord`]; a store commit
//! drains the buffer and appends the records as one batch closed by a
//! `Commit` frame. Replay applies complete batches only, so a crash
//! mid-batch rolls the store back to the previous commit.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use stratadb_codec::{Decoder, Encoder};
use stratadb_storage::StorageBackend;

/// Magic bytes identifying a journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"SKVJ";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Frame header size: magic (4) + version (2) + type (1) + length (4).
const HEADER_SIZE: usize = 11;

/// CRC trailer size.
const CRC_SIZE: usize = 4;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JournalRecordType {
    /// A map was created.
    CreateMap = 1,
    /// A map was renamed.
    RenameMap = 2,
    /// A map was dropped.
    DropMap = 3,
    /// A map was cleared.
    ClearMap = 4,
    /// An entry was inserted or updated.
    Put = 5,
    /// An entry was removed.
    Remove = 6,
    /// End of a committed batch.
    Commit = 7,
}

impl JournalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::CreateMap),
            2 => Some(Self::RenameMap),
            3 => Some(Self::DropMap),
            4 => Some(Self::ClearMap),
            5 => Some(Self::Put),
            6 => Some(Self::Remove),
            7 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A journal record describing one store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// A map was created with the given id and name.
    CreateMap {
        /// Stable map id.
        id: u32,
        /// Map name.
        name: String,
    },
    /// A map was renamed.
    RenameMap {
        /// Stable map id.
        id: u32,
        /// The new name.
        name: String,
    },
    /// A map was dropped.
    DropMap {
        /// Stable map id.
        id: u32,
    },
    /// All entries of a map were removed.
    ClearMap {
        /// Stable map id.
        id: u32,
    },
    /// An entry was inserted or updated.
    Put {
        /// Target map id.
        map_id: u32,
        /// Encoded key.
        key: Vec<u8>,
        /// Encoded value.
        value: Vec<u8>,
    },
    /// An entry was removed.
    Remove {
        /// Target map id.
        map_id: u32,
        /// Encoded key.
        key: Vec<u8>,
    },
    /// Closes a batch; everything since the previous `Commit` applies
    /// atomically.
    Commit {
        /// Store version after this batch.
        version: u64,
    },
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> JournalRecordType {
        match self {
            Self::CreateMap { .. } => JournalRecordType::CreateMap,
            Self::RenameMap { .. } => JournalRecordType::RenameMap,
            Self::DropMap { .. } => JournalRecordType::DropMap,
            Self::ClearMap { .. } => JournalRecordType::ClearMap,
            Self::Put { .. } => JournalRecordType::Put,
            Self::Remove { .. } => JournalRecordType::Remove,
            Self::Commit { .. } => JournalRecordType::Commit,
        }
    }

    /// Serializes the record payload (without the frame envelope).
    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        match self {
            Self::CreateMap { id, name } | Self::RenameMap { id, name } => {
                enc.write_varu64(u64::from(*id));
                enc.write_str(name);
            }
            Self::DropMap { id } | Self::ClearMap { id } => {
                enc.write_varu64(u64::from(*id));
            }
            Self::Put { map_id, key, value } => {
                enc.write_varu64(u64::from(*map_id));
                enc.write_len_bytes(key);
                enc.write_len_bytes(value);
            }
            Self::Remove { map_id, key } => {
                enc.write_varu64(u64::from(*map_id));
                enc.write_len_bytes(key);
            }
            Self::Commit { version } => {
                enc.write_varu64(*version);
            }
        }
        enc.into_bytes()
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: JournalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut dec = Decoder::new(payload);
        let record = match record_type {
            JournalRecordType::CreateMap => Self::CreateMap {
                id: dec.read_varu32()?,
                name: dec.read_str()?,
            },
            JournalRecordType::RenameMap => Self::RenameMap {
                id: dec.read_varu32()?,
                name: dec.read_str()?,
            },
            JournalRecordType::DropMap => Self::DropMap {
                id: dec.read_varu32()?,
            },
            JournalRecordType::ClearMap => Self::ClearMap {
                id: dec.read_varu32()?,
            },
            JournalRecordType::Put => Self::Put {
                map_id: dec.read_varu32()?,
                key: dec.read_len_bytes()?.to_vec(),
                value: dec.read_len_bytes()?.to_vec(),
            },
            JournalRecordType::Remove => Self::Remove {
                map_id: dec.read_varu32()?,
                key: dec.read_len_bytes()?.to_vec(),
            },
            JournalRecordType::Commit => Self::Commit {
                version: dec.read_varu64()?,
            },
        };
        dec.expect_end()?;
        Ok(record)
    }

    /// Builds the full framed form: header, payload, CRC trailer.
    ///
    /// # Errors
    ///
    /// Fails if the payload exceeds the 4 GiB the length field can
    /// describe; a frame that cannot be decoded again is never written.
    pub fn frame(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload();
        let len = u32::try_from(payload.len()).map_err(|_| {
            CoreError::invalid_argument(format!(
                "journal record payload of {} bytes exceeds the frame limit",
                payload.len()
            ))
        })?;
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// In-memory buffer of mutations not yet committed to the backend.
///
/// Shared between the store and every map it owns; its length is the
/// "unsaved pages" analog that drives mid-transaction store commits.
#[derive(Debug, Default)]
pub(crate) struct DirtyLog {
    ops: Mutex<Vec<JournalRecord>>,
}

impl DirtyLog {
    pub(crate) fn push(&self, record: JournalRecord) {
        self.ops.lock().push(record);
    }

    pub(crate) fn drain(&self) -> Vec<JournalRecord> {
        std::mem::take(&mut *self.ops.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.lock().len()
    }
}

/// Outcome of a journal replay.
#[derive(Debug)]
pub(crate) struct Replay {
    /// Records of all complete batches, in order.
    pub records: Vec<JournalRecord>,
    /// Version recorded by the last complete batch.
    pub version: u64,
    /// Offset just past the last complete batch.
    pub durable_end: u64,
}

/// Reads all complete batches from `backend`.
///
/// Stops at the first torn or corrupt frame and at the first frame not
/// followed through to a `Commit`; everything past the last complete
/// batch is reported through `durable_end` so the caller can truncate
/// it.
pub(crate) fn replay(backend: &dyn StorageBackend) -> CoreResult<Replay> {
    let size = backend.size()?;
    let mut offset = 0u64;
    let mut records = Vec::new();
    let mut batch = Vec::new();
    let mut version = 0u64;
    let mut durable_end = 0u64;

    while offset + (HEADER_SIZE as u64) <= size {
        let header = backend.read_at(offset, HEADER_SIZE)?;
        if header[0..4] != JOURNAL_MAGIC {
            tracing::warn!(offset, "journal frame with bad magic, discarding tail");
            break;
        }
        let frame_version = u16::from_le_bytes([header[4], header[5]]);
        if frame_version != JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(format!(
                "unsupported journal version {frame_version}"
            )));
        }
        let Some(record_type) = JournalRecordType::from_byte(header[6]) else {
            tracing::warn!(offset, "journal frame with unknown type, discarding tail");
            break;
        };
        let payload_len =
            u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let frame_len = (HEADER_SIZE + payload_len + CRC_SIZE) as u64;
        if offset + frame_len > size {
            tracing::warn!(offset, "torn journal frame, discarding tail");
            break;
        }
        let payload = backend.read_at(offset + HEADER_SIZE as u64, payload_len)?;
        let crc_bytes = backend.read_at(offset + (HEADER_SIZE + payload_len) as u64, CRC_SIZE)?;
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut framed = header;
        framed.extend_from_slice(&payload);
        if compute_crc32(&framed) != stored_crc {
            tracing::warn!(offset, "journal frame with bad checksum, discarding tail");
            break;
        }
        let record = JournalRecord::decode_payload(record_type, &payload)?;
        offset += frame_len;
        if let JournalRecord::Commit { version: v } = record {
            records.append(&mut batch);
            version = v;
            durable_end = offset;
        } else {
            batch.push(record);
        }
    }

    Ok(Replay {
        records,
        version,
        durable_end,
    })
}

/// Computes a CRC32 checksum (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
