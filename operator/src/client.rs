//! Typed access to every command an agent serves.

use crate::{
    dispatch::{Request, Response},
    Error,
};
use bytes::{Bytes, BytesMut};
use ipcbridge_codec::Write;
use ipcbridge_protocol::{Address, Allocation, Opcode, ServiceHandle, ServiceName, Status};
use ipcbridge_stream::{Channel, Config};
use std::io;
use tracing::debug;

/// Convert a wire length into a local one before anything is sent.
fn local_len(size: u64) -> Result<usize, Error> {
    usize::try_from(size).map_err(|_| Error::TooLarge(size))
}

/// Drives one agent over a blocking transport.
///
/// Every method sends one complete request and reads its complete reply, so the connection is
/// never left mid-command unless the transport itself fails (after which it should be dropped).
pub struct Client<T> {
    channel: Channel<T>,
}

impl<T: io::Read + io::Write> Client<T> {
    pub fn new(transport: T, config: Config) -> Self {
        Self {
            channel: Channel::new(transport, config),
        }
    }

    fn request(&mut self, opcode: Opcode, body: impl FnOnce(&mut BytesMut)) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        opcode.write(&mut buf);
        body(&mut buf);
        debug!(?opcode, len = buf.len(), "sending request");
        self.channel.send(&buf)?;
        Ok(())
    }

    /// Read a status word, turning failures into [Error::Status].
    fn status(&mut self) -> Result<(), Error> {
        let status: Status = self.channel.recv()?;
        status.into_result().map_err(Error::Status)
    }

    /// End the session, returning the transport.
    pub fn exit(mut self) -> Result<T, Error> {
        self.request(Opcode::Exit, |_| {})?;
        self.status()?;
        Ok(self.channel.into_inner())
    }

    /// Allocate a region on the target heap.
    pub fn allocate(&mut self, request: Allocation) -> Result<Address, Error> {
        self.request(Opcode::Allocate, |buf| request.write(buf))?;
        self.status()?;
        Ok(self.channel.recv()?)
    }

    /// Release a region. The agent passes any address straight to its allocator.
    pub fn free(&mut self, address: Address) -> Result<(), Error> {
        self.request(Opcode::Free, |buf| address.write(buf))?;
        self.status()
    }

    /// Copy `size` bytes out of target memory.
    pub fn read(&mut self, address: Address, size: u64) -> Result<Bytes, Error> {
        let len = local_len(size)?;
        self.request(Opcode::Read, |buf| {
            address.write(buf);
            size.write(buf);
        })?;
        self.status()?;
        Ok(self.channel.recv_bytes(len)?)
    }

    /// Copy `data` into target memory.
    pub fn write(&mut self, address: Address, data: &[u8]) -> Result<(), Error> {
        self.request(Opcode::Write, |buf| {
            address.write(buf);
            (data.len() as u64).write(buf);
        })?;
        self.channel.send(data)?;
        self.status()
    }

    /// Open a session with a registered service.
    pub fn get_service(&mut self, name: ServiceName) -> Result<ServiceHandle, Error> {
        self.request(Opcode::GetService, |buf| name.write(buf))?;
        self.status()?;
        Ok(self.channel.recv()?)
    }

    /// Close a service handle.
    pub fn close_service(&mut self, handle: ServiceHandle) -> Result<(), Error> {
        self.request(Opcode::CloseService, |buf| handle.write(buf))?;
        self.status()
    }

    /// Convert a plain session into a domain.
    ///
    /// On failure the unchanged handle is returned inside [Error::Conversion].
    pub fn convert_service_to_domain(
        &mut self,
        handle: ServiceHandle,
    ) -> Result<ServiceHandle, Error> {
        self.request(Opcode::ConvertServiceToDomain, |buf| handle.write(buf))?;
        let status: Status = self.channel.recv()?;
        if !status.is_success() {
            return Err(Error::Conversion(handle, status));
        }
        Ok(self.channel.recv()?)
    }

    /// Execute a generic call.
    pub fn dispatch(&mut self, request: &Request<'_>) -> Result<Response, Error> {
        let output_len = request.out_size_bytes() as usize;
        let buffer_lens = request
            .inline_out_sizes()
            .map(local_len)
            .collect::<Result<Vec<_>, _>>()?;
        let body = request.encode()?;

        self.request(Opcode::DispatchToService, |buf| buf.extend_from_slice(&body))?;
        self.status()?;
        let output = self.channel.recv_bytes(output_len)?;
        let objects = (0..request.out_object_count())
            .map(|_| self.channel.recv::<ServiceHandle>())
            .collect::<Result<Vec<_>, _>>()?;
        let buffers = buffer_lens
            .into_iter()
            .map(|len| self.channel.recv_bytes(len))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Response {
            output,
            objects,
            buffers,
        })
    }

    pub fn get_ref(&self) -> &T {
        self.channel.get_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcbridge_codec::Encode;
    use ipcbridge_protocol::BufferAttr;
    use ipcbridge_stream::mocks::Scripted;

    fn client(reply: Vec<u8>) -> Client<Scripted> {
        Client::new(Scripted::new(reply), Config::default())
    }

    #[test]
    fn test_allocate_request_layout() {
        let mut reply = Status::SUCCESS.encode().to_vec();
        reply.extend_from_slice(&0x4000u64.to_le_bytes());
        let mut client = client(reply);
        let address = client
            .allocate(Allocation::Aligned {
                size: 0x100,
                align: 0x10,
            })
            .unwrap();
        assert_eq!(address, 0x4000);

        let sent = client.get_ref().output();
        assert_eq!(sent[0], Opcode::Allocate as u8);
        assert_eq!(sent.len(), 1 + 24);
    }

    #[test]
    fn test_failed_status_reads_nothing_more() {
        let mut client = client(Status::OUT_OF_MEMORY.encode().to_vec());
        assert!(matches!(
            client.allocate(Allocation::Plain { size: 1 }),
            Err(Error::Status(Status::OUT_OF_MEMORY))
        ));
        assert_eq!(client.get_ref().remaining(), 0);
    }

    #[test]
    fn test_not_found() {
        let mut client = client(Status::NOT_FOUND.encode().to_vec());
        let name = ServiceName::new("nonexist").unwrap();
        assert!(matches!(
            client.get_service(name),
            Err(Error::Status(Status::NOT_FOUND))
        ));
    }

    #[test]
    fn test_conversion_failure_returns_handle() {
        let failure = Status::new(1, 125);
        let mut client = client(failure.encode().to_vec());
        let handle = ServiceHandle::from_raw_parts(4, 1, 0, 0);
        match client.convert_service_to_domain(handle) {
            Err(Error::Conversion(handle, status)) => {
                assert_eq!(handle.session, 4);
                assert_eq!(status, failure);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_failure_sends_whole_request() {
        let failure = Status::new(10, 221);
        let mut client = client(failure.encode().to_vec());
        let service = ServiceHandle::from_raw_parts(1, 1, 0, 0);
        let request = Request::new(&service, 7)
            .out_size(16)
            .inline_in(BufferAttr::empty(), b"abc")
            .inline_out(BufferAttr::empty(), 32);
        assert!(matches!(
            client.dispatch(&request),
            Err(Error::Status(status)) if status == failure
        ));

        let sent = client.get_ref().output();
        assert_eq!(sent[0], Opcode::DispatchToService as u8);
        assert_eq!(&sent[1..], &request.encode().unwrap()[..]);
    }
}
