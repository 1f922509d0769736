//! Wire types shared by both ends of an IPC bridge.
//!
//! An operator drives a target's service bus by sending one-byte [Opcode]s followed by
//! fixed-layout requests. Every reply starts with a [Status] word; the bytes that follow (if
//! any) are fully determined by the opcode and, for dispatches, by the request header. Nothing
//! on the wire is self-describing, so both ends must agree on every layout in this crate.
//!
//! All multi-byte fields are little-endian. Structures keep the natural C alignment of their
//! fields: padding bytes are written as zero and ignored when read.

pub mod dispatch;
pub mod memory;
pub mod opcode;
pub mod service;
pub mod status;

pub use dispatch::{BufferAttr, BufferDescriptor, DispatchHeader, TransportMode};
pub use memory::{Address, Allocation};
pub use opcode::{AllocateKind, Opcode};
pub use service::{Handle, ServiceHandle, ServiceName};
pub use status::Status;

use thiserror::Error;

/// Maximum number of buffers in a single dispatch.
pub const MAX_BUFFERS: usize = 8;

/// Maximum number of input objects in a single dispatch.
pub const MAX_IN_OBJECTS: usize = 8;

/// Maximum number of input handles in a single dispatch.
pub const MAX_IN_HANDLES: usize = 8;

/// Maximum number of output objects in a single dispatch.
pub const MAX_OUT_OBJECTS: usize = 8;

/// Maximum number of output handles in a single dispatch.
pub const MAX_OUT_HANDLES: usize = 8;

/// Errors that can occur when constructing wire values.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("service name too long: {0} bytes")]
    NameTooLong(usize),
    #[error("service name contains a nul byte")]
    NameContainsNul,
    #[error("{0} count exceeds limit: {1} > {2}")]
    LimitExceeded(&'static str, usize, usize),
}
