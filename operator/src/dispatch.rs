//! Build generic call requests and hold their results.

use bytes::{BufMut, Bytes, BytesMut};
use ipcbridge_codec::{FixedSize, Write};
use ipcbridge_protocol::{
    Address, BufferAttr, BufferDescriptor, DispatchHeader, Error, Handle, ServiceHandle,
    TransportMode, MAX_BUFFERS, MAX_IN_HANDLES, MAX_IN_OBJECTS, MAX_OUT_HANDLES,
    MAX_OUT_OBJECTS,
};

/// One buffer of a [Request].
#[derive(Clone, Debug)]
struct Buffer<'a> {
    descriptor: BufferDescriptor,
    /// Data sent after the descriptor (inline `in` buffers only).
    data: &'a [u8],
    /// Target region (reference buffers only).
    address: Address,
}

/// A generic call against one service.
///
/// Buffers, handles and output objects are laid out on the wire in the order they are added.
#[derive(Clone, Debug)]
pub struct Request<'a> {
    service: &'a ServiceHandle,
    request_id: u32,
    input: Bytes,
    out_size: u32,
    buffers: Vec<Buffer<'a>>,
    handles: Vec<Handle>,
    send_pid: bool,
    in_objects: u8,
    out_objects: u32,
    out_handles: u8,
    target_session: Handle,
    context: u32,
}

impl<'a> Request<'a> {
    pub fn new(service: &'a ServiceHandle, request_id: u32) -> Self {
        Self {
            service,
            request_id,
            input: Bytes::new(),
            out_size: 0,
            buffers: Vec::new(),
            handles: Vec::new(),
            send_pid: false,
            in_objects: 0,
            out_objects: 0,
            out_handles: 0,
            target_session: 0,
            context: 0,
        }
    }

    /// Set the opaque input payload.
    pub fn input(mut self, input: impl Into<Bytes>) -> Self {
        self.input = input.into();
        self
    }

    /// Set the size of the output payload.
    pub fn out_size(mut self, out_size: u32) -> Self {
        self.out_size = out_size;
        self
    }

    fn push(mut self, descriptor: BufferDescriptor, data: &'a [u8], address: Address) -> Self {
        self.buffers.push(Buffer {
            descriptor,
            data,
            address,
        });
        self
    }

    /// Send `data` in a scratch buffer on the target.
    pub fn inline_in(self, attr: BufferAttr, data: &'a [u8]) -> Self {
        let descriptor = BufferDescriptor::inline(data.len() as u64, attr | BufferAttr::IN);
        self.push(descriptor, data, 0)
    }

    /// Receive `size` bytes from a scratch buffer on the target.
    pub fn inline_out(self, attr: BufferAttr, size: u64) -> Self {
        let descriptor = BufferDescriptor::inline(size, attr | BufferAttr::OUT);
        self.push(descriptor, &[], 0)
    }

    /// Send `data` in a scratch buffer and receive its post-call contents.
    pub fn inline_in_out(self, attr: BufferAttr, data: &'a [u8]) -> Self {
        let descriptor = BufferDescriptor::inline(
            data.len() as u64,
            attr | BufferAttr::IN | BufferAttr::OUT,
        );
        self.push(descriptor, data, 0)
    }

    /// Pass an existing target region in place.
    ///
    /// Nothing is transferred for the region in either direction: `out` results stay in target
    /// memory and can be fetched with a Read.
    pub fn reference(self, attr: BufferAttr, address: Address, size: u64) -> Self {
        let descriptor = BufferDescriptor::reference(size, attr);
        self.push(descriptor, &[], address)
    }

    /// Pass a raw handle.
    pub fn handle(mut self, handle: Handle) -> Self {
        self.handles.push(handle);
        self
    }

    /// Attach the caller's process id.
    pub fn send_pid(mut self) -> Self {
        self.send_pid = true;
        self
    }

    pub fn in_objects(mut self, count: u8) -> Self {
        self.in_objects = count;
        self
    }

    /// Expect `count` output objects.
    pub fn out_objects(mut self, count: u32) -> Self {
        self.out_objects = count;
        self
    }

    pub fn out_handles(mut self, count: u8) -> Self {
        self.out_handles = count;
        self
    }

    /// Address `session` directly instead of the service's own session.
    pub fn target_session(mut self, session: Handle) -> Self {
        self.target_session = session;
        self
    }

    pub fn context(mut self, context: u32) -> Self {
        self.context = context;
        self
    }

    pub(crate) fn out_size_bytes(&self) -> u32 {
        self.out_size
    }

    pub(crate) fn out_object_count(&self) -> u32 {
        self.out_objects
    }

    /// Sizes of the inline `out` buffers, in table order.
    pub(crate) fn inline_out_sizes(&self) -> impl Iterator<Item = u64> + '_ {
        self.buffers
            .iter()
            .filter(|buffer| {
                buffer.descriptor.mode == TransportMode::Inline && buffer.descriptor.attr.is_out()
            })
            .map(|buffer| buffer.descriptor.size)
    }

    /// Number of bytes a successful reply carries after its status.
    pub fn reply_len(&self) -> u64 {
        self.out_size as u64
            + self.out_objects as u64 * ServiceHandle::SIZE as u64
            + self.inline_out_sizes().sum::<u64>()
    }

    fn header(&self) -> Result<DispatchHeader, Error> {
        let checks = [
            ("buffer", self.buffers.len(), MAX_BUFFERS),
            ("input object", self.in_objects as usize, MAX_IN_OBJECTS),
            ("input handle", self.handles.len(), MAX_IN_HANDLES),
            ("output object", self.out_objects as usize, MAX_OUT_OBJECTS),
            ("output handle", self.out_handles as usize, MAX_OUT_HANDLES),
        ];
        for (name, count, max) in checks {
            if count > max {
                return Err(Error::LimitExceeded(name, count, max));
            }
        }
        let service = self.service;
        Ok(DispatchHeader {
            service: ServiceHandle::from_raw_parts(
                service.session,
                service.own_handle,
                service.object_id,
                service.pointer_buffer_size,
            ),
            request_id: self.request_id,
            in_size: self.input.len() as u32,
            out_size: self.out_size,
            target_session: self.target_session,
            context: self.context,
            num_buffers: self.buffers.len() as u8,
            send_pid: self.send_pid,
            in_num_objects: self.in_objects,
            in_num_handles: self.handles.len() as u8,
            out_num_objects: self.out_objects,
            out_num_handles: self.out_handles,
        })
    }

    /// Encode the request body (everything after the opcode).
    pub fn encode(&self) -> Result<BytesMut, Error> {
        let header = self.header()?;
        let mut buf = BytesMut::with_capacity(DispatchHeader::SIZE + self.input.len());
        header.write(&mut buf);
        buf.put_slice(&self.input);
        for buffer in &self.buffers {
            buffer.descriptor.write(&mut buf);
            match buffer.descriptor.mode {
                TransportMode::Reference => buffer.address.write(&mut buf),
                TransportMode::Inline => buf.put_slice(buffer.data),
            }
        }
        for handle in &self.handles {
            handle.write(&mut buf);
        }
        Ok(buf)
    }
}

/// Results of a successful call.
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    /// Output payload.
    pub output: Bytes,
    /// Output objects, in slot order.
    pub objects: Vec<ServiceHandle>,
    /// Post-call contents of every inline `out` buffer, in table order.
    pub buffers: Vec<Bytes>,
}
