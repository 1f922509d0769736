//! Serialize fixed-layout wire structures.
//!
//! # Overview
//!
//! A small binary serialization library for protocols whose message boundaries are defined
//! entirely by fixed layouts:
//! - Serialize structured data into a fixed, little-endian binary format
//! - Deserialize untrusted binary input into structured data
//!
//! There are no length prefixes and no varints. A value occupies exactly the bytes its type
//! dictates, and a sequence of values is simply their concatenation.
//!
//! # Supported Types
//!
//! Natively supports:
//! - Primitives: `u8`, `u16`, `u32`, `u64`, `i8`, `i16`, `i32`, `i64`, `bool`
//! - Fixed-size byte arrays: `[u8; N]`
//!
//! User-defined types can be serialized and deserialized by implementing [Write], [Read] and
//! [FixedSize] (or [EncodeSize] for types whose size depends on their contents).
//!
//! # Example
//!
//! ```
//! use bytes::{Buf, BufMut};
//! use ipcbridge_codec::{DecodeExt, Encode, Error, FixedSize, Read, ReadExt, Write};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Region {
//!     address: u64,
//!     size: u32,
//! }
//!
//! impl Write for Region {
//!     fn write(&self, buf: &mut impl BufMut) {
//!         self.address.write(buf);
//!         self.size.write(buf);
//!     }
//! }
//!
//! impl Read for Region {
//!     type Cfg = ();
//!
//!     fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
//!         let address = u64::read(buf)?;
//!         let size = u32::read(buf)?;
//!         Ok(Self { address, size })
//!     }
//! }
//!
//! impl FixedSize for Region {
//!     const SIZE: usize = u64::SIZE + u32::SIZE;
//! }
//!
//! let region = Region { address: 0x1000, size: 0x20 };
//! let encoded = region.encode();
//! assert_eq!(encoded.len(), 12);
//! assert_eq!(Region::decode(encoded).unwrap(), region);
//! ```

pub mod codec;
pub mod error;
pub mod types;
pub mod util;

// Re-export main types and traits
pub use codec::{
    Decode, DecodeExt, Encode, EncodeFixed, EncodeSize, FixedSize, Read, ReadExt, Write,
};
pub use error::Error;
pub use types::primitives;
