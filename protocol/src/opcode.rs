//! Command identifiers.

use bytes::{Buf, BufMut};
use ipcbridge_codec::{Error, FixedSize, Read, ReadExt, Write};

/// One-byte command identifier that starts every request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Exit = 0,

    Allocate = 1,
    Free = 2,
    Read = 3,
    Write = 4,

    GetService = 5,
    CloseService = 6,
    ConvertServiceToDomain = 7,

    DispatchToService = 8,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Exit),
            1 => Ok(Self::Allocate),
            2 => Ok(Self::Free),
            3 => Ok(Self::Read),
            4 => Ok(Self::Write),
            5 => Ok(Self::GetService),
            6 => Ok(Self::CloseService),
            7 => Ok(Self::ConvertServiceToDomain),
            8 => Ok(Self::DispatchToService),
            other => Err(other),
        }
    }
}

impl Write for Opcode {
    fn write(&self, buf: &mut impl BufMut) {
        (*self as u8).write(buf);
    }
}

impl Read for Opcode {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let value = u8::read(buf)?;
        Self::try_from(value).map_err(|value| Error::InvalidEnum("Opcode", value))
    }
}

impl FixedSize for Opcode {
    const SIZE: usize = u8::SIZE;
}

/// Strategy used by an Allocate request.
///
/// Only [AllocateKind::Aligned] is followed by an alignment on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AllocateKind {
    /// Uninitialized memory.
    Plain = 0,
    /// Zero-filled memory.
    Zeroed = 1,
    /// Uninitialized memory with a caller-provided alignment.
    Aligned = 2,
}

impl TryFrom<u8> for AllocateKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Zeroed),
            2 => Ok(Self::Aligned),
            other => Err(other),
        }
    }
}
