//! Service names and capability handles.

use crate::Error;
use bytes::{Buf, BufMut};
use ipcbridge_codec::{
    util::{read_padding, write_padding},
    Error as CodecError, FixedSize, Read, ReadExt, Write,
};
use std::fmt;

/// Raw kernel handle value.
pub type Handle = u32;

/// Length of a service name on the wire.
pub const NAME_LENGTH: usize = 8;

/// Trailing bytes that round a [ServiceHandle] up to its 4-byte alignment.
const HANDLE_PADDING: usize = 2;

/// A service registry name: up to 8 bytes, nul padded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceName([u8; NAME_LENGTH]);

impl ServiceName {
    /// Create a name from a string of at most 8 bytes.
    pub fn new(name: &str) -> Result<Self, Error> {
        let bytes = name.as_bytes();
        if bytes.len() > NAME_LENGTH {
            return Err(Error::NameTooLong(bytes.len()));
        }
        if bytes.contains(&0) {
            return Err(Error::NameContainsNul);
        }
        let mut raw = [0u8; NAME_LENGTH];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    pub const fn from_raw(raw: [u8; NAME_LENGTH]) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> &[u8; NAME_LENGTH] {
        &self.0
    }

    /// The name without its nul padding.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(NAME_LENGTH);
        &self.0[..len]
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceName({self})")
    }
}

impl TryFrom<&str> for ServiceName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Write for ServiceName {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for ServiceName {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self(<[u8; NAME_LENGTH]>::read(buf)?))
    }
}

impl FixedSize for ServiceName {
    const SIZE: usize = NAME_LENGTH;
}

/// A capability referencing a service endpoint on the target.
///
/// The same record describes plain sessions, domains and domain sub-objects:
/// - a plain session owns its `session` handle and has no `object_id`
/// - a domain owns its `session` handle and has an `object_id`
/// - a domain sub-object shares its parent's `session` and has an `object_id`
/// - an override names only a `session`
///
/// `ServiceHandle` is not `Clone`: APIs that close or convert a handle take it by value, so a
/// closed handle can only be named again by rebuilding it from raw parts.
#[derive(Debug, PartialEq, Eq, Hash, Default)]
pub struct ServiceHandle {
    pub session: Handle,
    pub own_handle: u32,
    pub object_id: u32,
    pub pointer_buffer_size: u16,
}

impl ServiceHandle {
    /// Rebuild a handle from its raw parts.
    pub const fn from_raw_parts(
        session: Handle,
        own_handle: u32,
        object_id: u32,
        pointer_buffer_size: u16,
    ) -> Self {
        Self {
            session,
            own_handle,
            object_id,
            pointer_buffer_size,
        }
    }

    pub const fn is_active(&self) -> bool {
        self.session != 0
    }

    pub const fn is_override(&self) -> bool {
        self.is_active() && self.own_handle == 0 && self.object_id == 0
    }

    pub const fn is_domain(&self) -> bool {
        self.is_active() && self.own_handle != 0 && self.object_id != 0
    }

    pub const fn is_domain_subservice(&self) -> bool {
        self.is_active() && self.own_handle == 0 && self.object_id != 0
    }
}

impl Write for ServiceHandle {
    fn write(&self, buf: &mut impl BufMut) {
        self.session.write(buf);
        self.own_handle.write(buf);
        self.object_id.write(buf);
        self.pointer_buffer_size.write(buf);
        write_padding(buf, HANDLE_PADDING);
    }
}

impl Read for ServiceHandle {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let handle = Self {
            session: Handle::read(buf)?,
            own_handle: u32::read(buf)?,
            object_id: u32::read(buf)?,
            pointer_buffer_size: u16::read(buf)?,
        };
        read_padding(buf, HANDLE_PADDING)?;
        Ok(handle)
    }
}

impl FixedSize for ServiceHandle {
    const SIZE: usize = Handle::SIZE + u32::SIZE + u32::SIZE + u16::SIZE + HANDLE_PADDING;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcbridge_codec::{DecodeExt, Encode};

    #[test]
    fn test_name() {
        let name = ServiceName::new("fsp-srv").unwrap();
        assert_eq!(name.raw(), b"fsp-srv\0");
        assert_eq!(name.as_bytes(), b"fsp-srv");
        assert_eq!(name.to_string(), "fsp-srv");

        let full = ServiceName::new("set:sys1").unwrap();
        assert_eq!(full.as_bytes(), b"set:sys1");

        assert_eq!(ServiceName::new(""), Ok(ServiceName::default()));
        assert_eq!(
            ServiceName::new("nonexistent"),
            Err(Error::NameTooLong(11))
        );
        assert_eq!(ServiceName::new("a\0b"), Err(Error::NameContainsNul));
    }

    #[test]
    fn test_name_codec() {
        let name = ServiceName::try_from("acc:u0").unwrap();
        let encoded = name.encode();
        assert_eq!(encoded.as_ref(), b"acc:u0\0\0");
        assert_eq!(ServiceName::decode(encoded).unwrap(), name);
    }

    #[test]
    fn test_handle_layout() {
        assert_eq!(ServiceHandle::SIZE, 16);
        let handle = ServiceHandle::from_raw_parts(0x0102_0304, 1, 0x0a0b_0c0d, 0x0500);
        let encoded = handle.encode();
        assert_eq!(
            encoded.as_ref(),
            &[
                0x04, 0x03, 0x02, 0x01, // session
                0x01, 0x00, 0x00, 0x00, // own_handle
                0x0d, 0x0c, 0x0b, 0x0a, // object_id
                0x00, 0x05, // pointer_buffer_size
                0x00, 0x00, // padding
            ]
        );
        assert_eq!(ServiceHandle::decode(encoded).unwrap(), handle);
    }

    #[test]
    fn test_handle_padding_ignored() {
        let mut raw = [0u8; 16];
        raw[0] = 3;
        raw[14] = 0xaa;
        raw[15] = 0xbb;
        let handle = ServiceHandle::decode(&raw[..]).unwrap();
        assert_eq!(handle, ServiceHandle::from_raw_parts(3, 0, 0, 0));
        assert!(matches!(
            ServiceHandle::decode(&raw[..14]),
            Err(CodecError::EndOfBuffer)
        ));
    }

    #[test]
    fn test_handle_classes() {
        let closed = ServiceHandle::default();
        assert!(!closed.is_active());
        assert!(!closed.is_override());
        assert!(!closed.is_domain());

        let plain = ServiceHandle::from_raw_parts(5, 1, 0, 0);
        assert!(plain.is_active());
        assert!(!plain.is_domain());
        assert!(!plain.is_override());

        let domain = ServiceHandle::from_raw_parts(5, 1, 3, 0);
        assert!(domain.is_domain());
        assert!(!domain.is_domain_subservice());

        let sub = ServiceHandle::from_raw_parts(5, 0, 4, 0);
        assert!(sub.is_domain_subservice());
        assert!(!sub.is_domain());

        let overridden = ServiceHandle::from_raw_parts(9, 0, 0, 0);
        assert!(overridden.is_override());
    }
}
