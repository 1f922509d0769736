//! Composite status words.

use bytes::{Buf, BufMut};
use ipcbridge_codec::{Error, FixedSize, Read, ReadExt, Write};
use std::fmt;

/// Module identifier used for statuses produced by the bridge itself.
pub const MODULE: u32 = 396;

const MODULE_BITS: u32 = 9;
const DESCRIPTION_BITS: u32 = 13;
const MODULE_MASK: u32 = (1 << MODULE_BITS) - 1;
const DESCRIPTION_MASK: u32 = (1 << DESCRIPTION_BITS) - 1;

/// A 32-bit status word: a module identifier in the low 9 bits and a description code in the
/// next 13 bits. Zero means success.
///
/// Statuses returned by external primitives are relayed verbatim and never reinterpreted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Status(u32);

impl Status {
    pub const SUCCESS: Self = Self(0);

    /// The requested service name is not registered.
    pub const NOT_FOUND: Self = Self::new(MODULE, 1);
    /// The opcode is not part of the protocol.
    pub const UNKNOWN_COMMAND: Self = Self::new(MODULE, 2);
    /// A request field holds a value outside its domain.
    pub const INVALID_ARGUMENT: Self = Self::new(MODULE, 3);
    /// The target heap could not satisfy an allocation.
    pub const OUT_OF_MEMORY: Self = Self::new(MODULE, 4);
    /// A dispatch header exceeds a protocol maximum.
    pub const LIMIT_EXCEEDED: Self = Self::new(MODULE, 5);

    /// Compose a status from a module and description.
    pub const fn new(module: u32, description: u32) -> Self {
        Self((module & MODULE_MASK) | ((description & DESCRIPTION_MASK) << MODULE_BITS))
    }

    /// Wrap a raw status word.
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn module(&self) -> u32 {
        self.0 & MODULE_MASK
    }

    pub const fn description(&self) -> u32 {
        (self.0 >> MODULE_BITS) & DESCRIPTION_MASK
    }

    pub const fn is_success(&self) -> bool {
        self.0 == 0
    }

    /// Convert into a `Result`, mapping every non-zero status to `Err`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "2{:03}-{:04} ({:#x})",
            self.module(),
            self.description(),
            self.0
        )
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({self})")
    }
}

impl Write for Status {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Status {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        Ok(Self(u32::read(buf)?))
    }
}

impl FixedSize for Status {
    const SIZE: usize = u32::SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcbridge_codec::{DecodeExt, Encode};

    #[test]
    fn test_compose() {
        let status = Status::new(396, 4);
        assert_eq!(status.module(), 396);
        assert_eq!(status.description(), 4);
        assert_eq!(status.raw(), 396 | (4 << 9));
        assert!(!status.is_success());
        assert_eq!(status, Status::OUT_OF_MEMORY);
    }

    #[test]
    fn test_success() {
        assert!(Status::SUCCESS.is_success());
        assert_eq!(Status::default(), Status::SUCCESS);
        assert_eq!(Status::SUCCESS.into_result(), Ok(()));
        assert_eq!(
            Status::NOT_FOUND.into_result(),
            Err(Status::NOT_FOUND)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::new(1, 114).to_string(), "2001-0114 (0xe401)");
        assert_eq!(Status::NOT_FOUND.to_string(), "2396-0001 (0x38c)");
    }

    #[test]
    fn test_masking() {
        let status = Status::new(0x3ff, 0x3fff);
        assert_eq!(status.module(), 0x1ff);
        assert_eq!(status.description(), 0x1fff);
    }

    #[test]
    fn test_relay_verbatim() {
        // Bits above the description field survive a round trip untouched
        let raw: u32 = 0xdead_beef;
        let status = Status::decode(raw.encode()).unwrap();
        assert_eq!(status.raw(), raw);
        assert_eq!(status.encode().as_ref(), &raw.to_le_bytes());
    }
}
