//! Primitives the target's service bus provides to the agent.

use crate::memory::RawRegion;
use ipcbridge_protocol::{BufferAttr, Handle, ServiceHandle, ServiceName, Status};

/// One entry of the buffer table handed to [Platform::dispatch].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Buffer {
    pub region: RawRegion,
    pub attr: BufferAttr,
}

/// Everything a generic call carries besides its target.
#[derive(Debug)]
pub struct Call<'a> {
    pub request_id: u32,
    /// Opaque input payload.
    pub input: &'a [u8],
    /// Output payload, filled by the call.
    pub output: &'a mut [u8],
    /// Buffer table in request order.
    pub buffers: &'a [Buffer],
    /// Raw handles passed to the service.
    pub handles: &'a [Handle],
    pub send_pid: bool,
    pub in_object_count: u8,
    /// One slot per expected output object.
    pub objects: &'a mut [ServiceHandle],
    pub out_handle_count: u8,
    /// Session used instead of the target's own when non-zero.
    pub target_session: Handle,
    pub context: u32,
}

/// The service registry and call primitives of the target.
///
/// Failures are reported as opaque [Status] words and relayed to the operator verbatim.
pub trait Platform {
    /// Query whether `name` is registered.
    fn is_registered(&mut self, name: &ServiceName) -> Result<bool, Status>;

    /// Open a session with a registered service.
    fn open(&mut self, name: &ServiceName) -> Result<ServiceHandle, Status>;

    /// Release a handle.
    fn close(&mut self, handle: ServiceHandle);

    /// Convert a plain session into a domain, updating `handle` in place.
    fn convert_to_domain(&mut self, handle: &mut ServiceHandle) -> Result<(), Status>;

    /// Execute a generic call against `service`.
    ///
    /// Every [Buffer] region in `call` is raw target memory, valid for the duration of the call
    /// only if the operator named it correctly.
    fn dispatch(&mut self, service: &ServiceHandle, call: Call<'_>) -> Result<(), Status>;
}

impl<P: Platform + ?Sized> Platform for &mut P {
    fn is_registered(&mut self, name: &ServiceName) -> Result<bool, Status> {
        (**self).is_registered(name)
    }

    fn open(&mut self, name: &ServiceName) -> Result<ServiceHandle, Status> {
        (**self).open(name)
    }

    fn close(&mut self, handle: ServiceHandle) {
        (**self).close(handle)
    }

    fn convert_to_domain(&mut self, handle: &mut ServiceHandle) -> Result<(), Status> {
        (**self).convert_to_domain(handle)
    }

    fn dispatch(&mut self, service: &ServiceHandle, call: Call<'_>) -> Result<(), Status> {
        (**self).dispatch(service, call)
    }
}
