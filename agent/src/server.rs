//! Command loop.

use crate::{dispatch, heap::Heap, memory, platform::Platform, session, Config, Error};
use ipcbridge_protocol::{Opcode, Status};
use ipcbridge_stream::Channel;
use std::io;
use tracing::{debug, info, warn};

/// Serves operator commands over a single connection, one at a time.
pub struct Server<T, H, P> {
    channel: Channel<T>,
    heap: H,
    platform: P,
}

impl<T, H, P> Server<T, H, P>
where
    T: io::Read + io::Write,
    H: Heap,
    P: Platform,
{
    pub fn new(transport: T, heap: H, platform: P, config: Config) -> Self {
        Self {
            channel: Channel::new(transport, config.channel),
            heap,
            platform,
        }
    }

    /// Serve commands until the operator sends Exit.
    ///
    /// Any transport failure ends the session: the stream position is unknown afterwards.
    pub fn run(&mut self) -> Result<(), Error> {
        while self.step()? {}
        info!("operator exited");
        Ok(())
    }

    /// Serve exactly one command, returning `false` once Exit has been acknowledged.
    pub fn step(&mut self) -> Result<bool, Error> {
        let raw: u8 = self.channel.recv()?;
        let opcode = match Opcode::try_from(raw) {
            Ok(opcode) => opcode,
            Err(raw) => {
                warn!(opcode = raw, "unknown command");
                self.channel.send_value(&Status::UNKNOWN_COMMAND)?;
                return Ok(true);
            }
        };
        debug!(?opcode, "handling command");

        let channel = &mut self.channel;
        match opcode {
            Opcode::Exit => {
                channel.send_value(&Status::SUCCESS)?;
                return Ok(false);
            }
            Opcode::Allocate => memory::allocate(channel, &self.heap)?,
            Opcode::Free => memory::free(channel, &self.heap)?,
            Opcode::Read => memory::read(channel)?,
            Opcode::Write => memory::write(channel)?,
            Opcode::GetService => session::get_service(channel, &mut self.platform)?,
            Opcode::CloseService => session::close_service(channel, &mut self.platform)?,
            Opcode::ConvertServiceToDomain => {
                session::convert_service_to_domain(channel, &mut self.platform)?
            }
            Opcode::DispatchToService => {
                dispatch::dispatch(channel, &self.heap, &mut self.platform)?
            }
        }
        Ok(true)
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn transport(&self) -> &T {
        self.channel.get_ref()
    }

    /// Tear the server down, returning its transport, heap and platform.
    pub fn into_parts(self) -> (T, H, P) {
        (self.channel.into_inner(), self.heap, self.platform)
    }
}
