//! Remote heap requests.

use crate::opcode::AllocateKind;
use bytes::{Buf, BufMut};
use ipcbridge_codec::{
    util::{read_padding, write_padding},
    EncodeSize, Error, FixedSize, Read, ReadExt, Write,
};

/// Target address of a memory region.
pub type Address = u64;

/// Bytes between the kind and the 8-byte aligned size of an Allocate request.
pub const KIND_PADDING: usize = 7;

/// Body of an Allocate request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Allocation {
    /// `size` bytes of uninitialized memory.
    Plain { size: u64 },
    /// `size` zero-filled bytes.
    Zeroed { size: u64 },
    /// `size` bytes of uninitialized memory aligned to `align`.
    Aligned { size: u64, align: u64 },
}

impl Allocation {
    pub fn kind(&self) -> AllocateKind {
        match self {
            Self::Plain { .. } => AllocateKind::Plain,
            Self::Zeroed { .. } => AllocateKind::Zeroed,
            Self::Aligned { .. } => AllocateKind::Aligned,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Plain { size } | Self::Zeroed { size } | Self::Aligned { size, .. } => *size,
        }
    }
}

impl Write for Allocation {
    fn write(&self, buf: &mut impl BufMut) {
        (self.kind() as u8).write(buf);
        write_padding(buf, KIND_PADDING);
        self.size().write(buf);
        if let Self::Aligned { align, .. } = self {
            align.write(buf);
        }
    }
}

impl EncodeSize for Allocation {
    fn encode_size(&self) -> usize {
        let align = match self {
            Self::Aligned { .. } => u64::SIZE,
            _ => 0,
        };
        u8::SIZE + KIND_PADDING + u64::SIZE + align
    }
}

impl Read for Allocation {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let kind = u8::read(buf)?;
        read_padding(buf, KIND_PADDING)?;
        let size = u64::read(buf)?;
        match AllocateKind::try_from(kind) {
            Ok(AllocateKind::Plain) => Ok(Self::Plain { size }),
            Ok(AllocateKind::Zeroed) => Ok(Self::Zeroed { size }),
            Ok(AllocateKind::Aligned) => Ok(Self::Aligned {
                size,
                align: u64::read(buf)?,
            }),
            Err(kind) => Err(Error::InvalidEnum("AllocateKind", kind)),
        }
    }
}
