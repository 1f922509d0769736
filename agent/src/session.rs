//! Open, close and upgrade service capability handles.

use crate::{platform::Platform, Error};
use ipcbridge_protocol::{ServiceHandle, ServiceName, Status};
use ipcbridge_stream::Channel;
use std::io;
use tracing::{debug, warn};

/// Serve a GetService request.
pub fn get_service<T, P>(channel: &mut Channel<T>, platform: &mut P) -> Result<(), Error>
where
    T: io::Read + io::Write,
    P: Platform,
{
    let name: ServiceName = channel.recv()?;
    match platform.is_registered(&name) {
        Ok(true) => {}
        Ok(false) => {
            debug!(%name, "service not registered");
            channel.send_value(&Status::NOT_FOUND)?;
            return Ok(());
        }
        Err(status) => {
            warn!(%name, %status, "registry query failed");
            channel.send_value(&status)?;
            return Ok(());
        }
    }

    match platform.open(&name) {
        Ok(handle) => {
            debug!(%name, ?handle, "opened service");
            channel.send_value(&Status::SUCCESS)?;
            channel.send_value(&handle)?;
        }
        Err(status) => {
            warn!(%name, %status, "unable to open service");
            channel.send_value(&status)?;
        }
    }
    Ok(())
}

/// Serve a CloseService request.
pub fn close_service<T, P>(channel: &mut Channel<T>, platform: &mut P) -> Result<(), Error>
where
    T: io::Read + io::Write,
    P: Platform,
{
    let handle: ServiceHandle = channel.recv()?;
    debug!(?handle, "closing service");
    platform.close(handle);
    channel.send_value(&Status::SUCCESS)?;
    Ok(())
}

/// Serve a ConvertServiceToDomain request.
pub fn convert_service_to_domain<T, P>(
    channel: &mut Channel<T>,
    platform: &mut P,
) -> Result<(), Error>
where
    T: io::Read + io::Write,
    P: Platform,
{
    let mut handle: ServiceHandle = channel.recv()?;
    match platform.convert_to_domain(&mut handle) {
        Ok(()) => {
            debug!(?handle, "converted service to domain");
            channel.send_value(&Status::SUCCESS)?;
            channel.send_value(&handle)?;
        }
        Err(status) => {
            warn!(?handle, %status, "domain conversion failed");
            channel.send_value(&status)?;
        }
    }
    Ok(())
}
