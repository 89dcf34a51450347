//! # StrataDB Codec
//!
//! Deterministic binary encoding for StrataDB keys and values.
//!
//! Two integer encodings coexist, on purpose:
//!
//! - **LEB128 varints** (`write_varu64`) for value positions, where
//!   compactness matters and ordering does not.
//! - **Order-preserving varints** (`write_ordered_u64`) for key
//!   positions: the encoded bytes compare bytewise exactly as the
//!   decoded integers compare numerically. The backing maps order
//!   entries by raw bytes, so every key encoding in this crate must
//!   preserve order.
//!
//! Identical inputs always produce identical bytes, so byte equality of
//! two encoded values is value equality.
//!
//! ## Usage
//!
//! ```
//! use stratadb_codec::{Decoder, Encoder};
//!
//! let mut enc = Encoder::new();
//! enc.write_varu64(300);
//! enc.write_str("hello");
//! let bytes = enc.into_bytes();
//!
//! let mut dec = Decoder::new(&bytes);
//! assert_eq!(dec.read_varu64().unwrap(), 300);
//! assert_eq!(dec.read_str().unwrap(), "hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod types;
mod varint;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{CodecError, CodecResult};
pub use types::{KeyCodec, ValueCodec};
pub use varint::{
    read_ordered_u64, read_varu64, write_ordered_u64, write_varu64, MAX_VARINT_LEN,
};
