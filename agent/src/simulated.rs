//! An in-process service bus.
//!
//! [Platform] implements the registry, session and call primitives without a real kernel, so
//! the agent can be exercised end to end on any host. It keeps a table of live sessions,
//! converts sessions into domains, hands out domain sub-objects and understands a handful of
//! request ids:
//!
//! | Id | Command       | Behavior |
//! |----|---------------|----------|
//! | 0  | [ECHO]        | Copies the input payload into the output payload. |
//! | 1  | [GATHER]      | Concatenates every `in` buffer and scatters the result over the `out` buffers. The output payload receives the total length as a `u32`. |
//! | 2  | [OPEN_OBJECTS]| Fills every output object slot with a new object of the same service. |
//! | 3  | [FAIL]        | Fails with the status encoded in the first 4 bytes of the input payload. |
//! | 4  | [ECHO_HANDLES]| Writes each input handle into the output payload, followed by the pid flag. |

use crate::platform::{self, Call};
use bytes::BufMut;
use ipcbridge_codec::{DecodeExt, FixedSize};
use ipcbridge_protocol::{Error as ProtocolError, Handle, ServiceHandle, ServiceName, Status};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, trace};

pub const ECHO: u32 = 0;
pub const GATHER: u32 = 1;
pub const OPEN_OBJECTS: u32 = 2;
pub const FAIL: u32 = 3;
pub const ECHO_HANDLES: u32 = 4;

/// The handle does not name a live session or object.
pub const INVALID_HANDLE: Status = Status::new(1, 114);
/// The session is already a domain.
pub const INVALID_STATE: Status = Status::new(1, 125);
/// The service does not implement the request id.
pub const UNKNOWN_REQUEST: Status = Status::new(10, 221);
/// The input payload is too short for the request.
pub const INVALID_INPUT: Status = Status::new(10, 202);

/// Pointer buffer size advertised by every session.
pub const POINTER_BUFFER_SIZE: u16 = 0x500;

/// Object id of a domain's own root object.
const ROOT_OBJECT: u32 = 1;

struct Session {
    name: ServiceName,
    /// Live object ids, if the session is a domain.
    domain: Option<BTreeSet<u32>>,
    next_object: u32,
}

/// A simulated service registry and session table.
pub struct Platform {
    registry: HashSet<ServiceName>,
    sessions: HashMap<Handle, Session>,
    next_handle: Handle,
    registry_failure: Option<Status>,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            registry: HashSet::new(),
            sessions: HashMap::new(),
            next_handle: 1,
            registry_failure: None,
        }
    }
}

impl Platform {
    /// Create a platform with the given services registered.
    pub fn with_services<'a>(
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ProtocolError> {
        let mut platform = Self::default();
        for name in names {
            platform.register(ServiceName::new(name)?);
        }
        Ok(platform)
    }

    pub fn register(&mut self, name: ServiceName) {
        self.registry.insert(name);
    }

    /// Make every subsequent registry query fail with `status`.
    pub fn fail_registry(&mut self, status: Status) {
        self.registry_failure = Some(status);
    }

    /// Number of live sessions.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Whether `handle` still names a live session (and, for domain objects, a live object).
    pub fn is_open(&self, handle: &ServiceHandle) -> bool {
        self.resolve(handle.session, handle.object_id).is_ok()
    }

    fn resolve(&self, session: Handle, object_id: u32) -> Result<&Session, Status> {
        let entry = self.sessions.get(&session).ok_or(INVALID_HANDLE)?;
        match (&entry.domain, object_id) {
            (_, 0) => Ok(entry),
            (Some(objects), id) if objects.contains(&id) => Ok(entry),
            _ => Err(INVALID_HANDLE),
        }
    }

    fn open_session(&mut self, name: ServiceName) -> ServiceHandle {
        let session = self.next_handle;
        self.next_handle += 1;
        self.sessions.insert(
            session,
            Session {
                name,
                domain: None,
                next_object: ROOT_OBJECT + 1,
            },
        );
        ServiceHandle::from_raw_parts(session, 1, 0, POINTER_BUFFER_SIZE)
    }

    fn open_objects(
        &mut self,
        session: Handle,
        slots: &mut [ServiceHandle],
    ) -> Result<(), Status> {
        let entry = self.sessions.get_mut(&session).ok_or(INVALID_HANDLE)?;
        if let Some(objects) = entry.domain.as_mut() {
            for slot in slots.iter_mut() {
                let id = entry.next_object;
                entry.next_object += 1;
                objects.insert(id);
                *slot = ServiceHandle::from_raw_parts(session, 0, id, POINTER_BUFFER_SIZE);
            }
            return Ok(());
        }

        // Outside a domain every object is a session of its own
        let name = entry.name;
        for slot in slots.iter_mut() {
            *slot = self.open_session(name);
        }
        Ok(())
    }
}

fn gather(call: &mut Call<'_>) {
    let mut gathered = Vec::new();
    for buffer in call.buffers.iter().filter(|buffer| buffer.attr.is_in()) {
        // SAFETY: regions are valid for the duration of the call
        gathered.extend_from_slice(unsafe { buffer.region.as_slice() });
    }

    let mut remaining = &gathered[..];
    for buffer in call.buffers.iter().filter(|buffer| buffer.attr.is_out()) {
        // SAFETY: regions are valid for the duration of the call
        let out = unsafe { buffer.region.as_mut_slice() };
        let n = out.len().min(remaining.len());
        out[..n].copy_from_slice(&remaining[..n]);
        remaining = &remaining[n..];
    }

    let total = (gathered.len() as u32).to_le_bytes();
    let n = call.output.len().min(total.len());
    call.output[..n].copy_from_slice(&total[..n]);
}

fn echo_handles(call: &mut Call<'_>) {
    let mut out = &mut call.output[..];
    for handle in call.handles {
        if out.remaining_mut() < Handle::SIZE {
            return;
        }
        out.put_u32_le(*handle);
    }
    if out.has_remaining_mut() {
        out.put_u8(call.send_pid as u8);
    }
}

impl platform::Platform for Platform {
    fn is_registered(&mut self, name: &ServiceName) -> Result<bool, Status> {
        match self.registry_failure {
            Some(status) => Err(status),
            None => Ok(self.registry.contains(name)),
        }
    }

    fn open(&mut self, name: &ServiceName) -> Result<ServiceHandle, Status> {
        if !self.registry.contains(name) {
            return Err(INVALID_HANDLE);
        }
        let handle = self.open_session(*name);
        debug!(%name, session = handle.session, "session opened");
        Ok(handle)
    }

    fn close(&mut self, handle: ServiceHandle) {
        if handle.own_handle != 0 {
            if self.sessions.remove(&handle.session).is_some() {
                debug!(session = handle.session, "session closed");
            }
            return;
        }
        if handle.is_domain_subservice() {
            if let Some(objects) = self
                .sessions
                .get_mut(&handle.session)
                .and_then(|entry| entry.domain.as_mut())
            {
                objects.remove(&handle.object_id);
                debug!(
                    session = handle.session,
                    object_id = handle.object_id,
                    "object closed"
                );
            }
        }
    }

    fn convert_to_domain(&mut self, handle: &mut ServiceHandle) -> Result<(), Status> {
        let entry = self
            .sessions
            .get_mut(&handle.session)
            .ok_or(INVALID_HANDLE)?;
        if entry.domain.is_some() || handle.object_id != 0 {
            return Err(INVALID_STATE);
        }
        entry.domain = Some(BTreeSet::from([ROOT_OBJECT]));
        handle.object_id = ROOT_OBJECT;
        Ok(())
    }

    fn dispatch(&mut self, service: &ServiceHandle, mut call: Call<'_>) -> Result<(), Status> {
        let session = match call.target_session {
            0 => {
                self.resolve(service.session, service.object_id)?;
                service.session
            }
            session => {
                self.resolve(session, 0)?;
                session
            }
        };
        trace!(session, request_id = call.request_id, "simulated call");

        match call.request_id {
            ECHO => {
                let n = call.output.len().min(call.input.len());
                call.output[..n].copy_from_slice(&call.input[..n]);
                Ok(())
            }
            GATHER => {
                gather(&mut call);
                Ok(())
            }
            OPEN_OBJECTS => self.open_objects(session, call.objects),
            FAIL => {
                let raw = call.input.get(..Status::SIZE).ok_or(INVALID_INPUT)?;
                Status::decode(raw)
                    .map_err(|_| INVALID_INPUT)?
                    .into_result()
            }
            ECHO_HANDLES => {
                echo_handles(&mut call);
                Ok(())
            }
            _ => Err(UNKNOWN_REQUEST),
        }
    }
}
