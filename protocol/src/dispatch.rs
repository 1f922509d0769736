//! Layout of a generic dispatch request.
//!
//! A dispatch is encoded as a [DispatchHeader], then `in_size` bytes of opaque input payload,
//! then `num_buffers` buffer entries, then `in_num_handles` raw [Handle]s. Each buffer entry is
//! a [BufferDescriptor] followed by either a target address (reference mode) or, for inline
//! buffers flagged [BufferAttr::IN], exactly `size` bytes of data.
//!
//! A successful reply carries `out_size` payload bytes, `out_num_objects` [ServiceHandle]s and
//! then the contents of each inline buffer flagged [BufferAttr::OUT], in table order. A failed
//! reply carries nothing beyond its status.

use crate::{
    service::{Handle, ServiceHandle},
    Error, MAX_BUFFERS, MAX_IN_HANDLES, MAX_IN_OBJECTS, MAX_OUT_HANDLES, MAX_OUT_OBJECTS,
};
use bytes::{Buf, BufMut};
use ipcbridge_codec::{
    util::{read_padding, write_padding},
    Error as CodecError, FixedSize, Read, ReadExt, Write,
};
use std::ops::BitOr;

/// Trailing bytes that round a [BufferDescriptor] up to its 8-byte alignment.
const DESCRIPTOR_PADDING: usize = 3;

/// Trailing bytes that round a [DispatchHeader] up to its 4-byte alignment.
const HEADER_PADDING: usize = 3;

/// Direction and transfer flags of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BufferAttr(u32);

impl BufferAttr {
    pub const IN: Self = Self(1 << 0);
    pub const OUT: Self = Self(1 << 1);
    pub const HIPC_MAP_ALIAS: Self = Self(1 << 2);
    pub const HIPC_POINTER: Self = Self(1 << 3);
    pub const FIXED_SIZE: Self = Self(1 << 4);
    pub const HIPC_AUTO_SELECT: Self = Self(1 << 5);
    pub const HIPC_MAP_TRANSFER_ALLOWS_NON_SECURE: Self = Self(1 << 6);
    pub const HIPC_MAP_TRANSFER_ALLOWS_NON_DEVICE: Self = Self(1 << 7);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_in(&self) -> bool {
        self.contains(Self::IN)
    }

    pub const fn is_out(&self) -> bool {
        self.contains(Self::OUT)
    }
}

impl BitOr for BufferAttr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// How a buffer's memory is provided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportMode {
    /// Backed by scratch memory allocated for the duration of one dispatch.
    Inline,
    /// Backed by an existing target region named by address; nothing is allocated or freed.
    Reference,
}

/// Metadata for one entry of a dispatch buffer table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    pub size: u64,
    pub attr: BufferAttr,
    pub mode: TransportMode,
}

impl BufferDescriptor {
    /// A buffer backed by per-call scratch memory.
    pub const fn inline(size: u64, attr: BufferAttr) -> Self {
        Self {
            size,
            attr,
            mode: TransportMode::Inline,
        }
    }

    /// A buffer backed by an existing target region.
    pub const fn reference(size: u64, attr: BufferAttr) -> Self {
        Self {
            size,
            attr,
            mode: TransportMode::Reference,
        }
    }

    /// Number of request bytes that follow this descriptor on the wire.
    pub fn trailing_request_len(&self) -> u64 {
        match self.mode {
            TransportMode::Reference => u64::SIZE as u64,
            TransportMode::Inline if self.attr.is_in() => self.size,
            TransportMode::Inline => 0,
        }
    }

    /// Number of reply bytes this buffer contributes after a successful call.
    pub fn reply_len(&self) -> u64 {
        match self.mode {
            TransportMode::Inline if self.attr.is_out() => self.size,
            _ => 0,
        }
    }
}

impl Write for BufferDescriptor {
    fn write(&self, buf: &mut impl BufMut) {
        self.size.write(buf);
        self.attr.0.write(buf);
        (self.mode == TransportMode::Reference).write(buf);
        write_padding(buf, DESCRIPTOR_PADDING);
    }
}

impl Read for BufferDescriptor {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let size = u64::read(buf)?;
        let attr = BufferAttr(u32::read(buf)?);
        let mode = if bool::read(buf)? {
            TransportMode::Reference
        } else {
            TransportMode::Inline
        };
        read_padding(buf, DESCRIPTOR_PADDING)?;
        Ok(Self { size, attr, mode })
    }
}

impl FixedSize for BufferDescriptor {
    const SIZE: usize = u64::SIZE + u32::SIZE + bool::SIZE + DESCRIPTOR_PADDING;
}

/// Fixed header of a dispatch request.
#[derive(Debug, PartialEq, Eq, Default)]
pub struct DispatchHeader {
    /// Service the call is addressed to.
    pub service: ServiceHandle,
    pub request_id: u32,
    pub in_size: u32,
    pub out_size: u32,

    /// Low-level session used instead of the service's own session when non-zero.
    pub target_session: Handle,
    /// Context tag for calls that bypass the handle abstraction.
    pub context: u32,
    pub num_buffers: u8,
    pub send_pid: bool,
    pub in_num_objects: u8,
    pub in_num_handles: u8,
    pub out_num_objects: u32,
    pub out_num_handles: u8,
}

impl DispatchHeader {
    /// Check every table count against its protocol maximum.
    pub fn validate(&self) -> Result<(), Error> {
        let checks = [
            ("buffer", self.num_buffers as usize, MAX_BUFFERS),
            ("input object", self.in_num_objects as usize, MAX_IN_OBJECTS),
            ("input handle", self.in_num_handles as usize, MAX_IN_HANDLES),
            ("output object", self.out_num_objects as usize, MAX_OUT_OBJECTS),
            ("output handle", self.out_num_handles as usize, MAX_OUT_HANDLES),
        ];
        for (name, count, max) in checks {
            if count > max {
                return Err(Error::LimitExceeded(name, count, max));
            }
        }
        Ok(())
    }
}

impl Write for DispatchHeader {
    fn write(&self, buf: &mut impl BufMut) {
        self.service.write(buf);
        self.request_id.write(buf);
        self.in_size.write(buf);
        self.out_size.write(buf);
        self.target_session.write(buf);
        self.context.write(buf);
        self.num_buffers.write(buf);
        self.send_pid.write(buf);
        self.in_num_objects.write(buf);
        self.in_num_handles.write(buf);
        self.out_num_objects.write(buf);
        self.out_num_handles.write(buf);
        write_padding(buf, HEADER_PADDING);
    }
}

impl Read for DispatchHeader {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let header = Self {
            service: ServiceHandle::read(buf)?,
            request_id: u32::read(buf)?,
            in_size: u32::read(buf)?,
            out_size: u32::read(buf)?,
            target_session: Handle::read(buf)?,
            context: u32::read(buf)?,
            num_buffers: u8::read(buf)?,
            send_pid: bool::read(buf)?,
            in_num_objects: u8::read(buf)?,
            in_num_handles: u8::read(buf)?,
            out_num_objects: u32::read(buf)?,
            out_num_handles: u8::read(buf)?,
        };
        read_padding(buf, HEADER_PADDING)?;
        Ok(header)
    }
}

impl FixedSize for DispatchHeader {
    const SIZE: usize = ServiceHandle::SIZE
        + u32::SIZE * 3
        + Handle::SIZE
        + u32::SIZE
        + u8::SIZE
        + bool::SIZE
        + u8::SIZE * 2
        + u32::SIZE
        + u8::SIZE
        + HEADER_PADDING;
}
