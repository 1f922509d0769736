//! Serve remote heap, service and dispatch commands on a target.
//!
//! # Overview
//!
//! The agent runs on the device being driven. A [Server] reads one opcode at a time from its
//! transport and answers each command completely before reading the next:
//! - [memory] allocates, frees, reads and writes raw regions of the target's [heap::Heap]
//! - [session] opens, closes and upgrades service handles through the [Platform]
//! - [dispatch] marshals one generic call, including its buffer table, handles and output
//!   objects
//!
//! Protocol failures are answered with a status word and never end the loop. Transport
//! failures are fatal and returned from [Server::run] as [Error].
//!
//! # Example
//!
//! ```
//! use ipcbridge_agent::{heap::Native, simulated, Config, Server};
//! use ipcbridge_stream::mocks::Scripted;
//!
//! // A script holding a single Exit command
//! let platform = simulated::Platform::with_services(["fsp-srv"]).unwrap();
//! let mut server = Server::new(Scripted::new(vec![0u8]), Native, platform, Config::default());
//! server.run().unwrap();
//! assert_eq!(server.transport().output(), &[0, 0, 0, 0]);
//! ```

pub mod dispatch;
pub mod heap;
pub mod memory;
pub mod platform;
mod server;
pub mod session;
pub mod simulated;

pub use platform::Platform;
pub use server::Server;

use thiserror::Error;

/// Errors that end a [Server].
#[derive(Error, Debug)]
pub enum Error {
    #[error("stream failed: {0}")]
    Stream(#[from] ipcbridge_stream::Error),
}

/// Configuration for a [Server].
#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
    /// Transport settings.
    pub channel: ipcbridge_stream::Config,
}
