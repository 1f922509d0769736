//! Drive a remote agent's heap, services and generic calls.
//!
//! A [Client] speaks the operator side of the bridge over any blocking transport. Replies are
//! not self-describing: the client always checks the status word first and only reads the
//! payload a successful reply is known to carry.
//!
//! # Example
//!
//! ```no_run
//! use ipcbridge_operator::{dispatch::Request, Client};
//! use ipcbridge_protocol::{BufferAttr, ServiceName};
//! use ipcbridge_stream::Config;
//! use std::net::TcpStream;
//!
//! let stream = TcpStream::connect("127.0.0.1:7890").unwrap();
//! let mut client = Client::new(stream, Config::default());
//!
//! let service = client.get_service(ServiceName::new("fsp-srv").unwrap()).unwrap();
//! let request = Request::new(&service, 1)
//!     .inline_in(BufferAttr::empty(), b"path")
//!     .out_size(8);
//! let response = client.dispatch(&request).unwrap();
//! println!("{:?}", response.output);
//!
//! client.close_service(service).unwrap();
//! client.exit().unwrap();
//! ```

mod client;
pub mod dispatch;
pub mod hex;

pub use client::Client;

use ipcbridge_protocol::{ServiceHandle, Status};
use thiserror::Error;

/// Errors that can occur when driving an agent.
#[derive(Error, Debug)]
pub enum Error {
    #[error("command failed: {0}")]
    Status(Status),
    #[error("domain conversion failed: {1}")]
    Conversion(ServiceHandle, Status),
    #[error("invalid request: {0}")]
    Protocol(#[from] ipcbridge_protocol::Error),
    #[error("stream failed: {0}")]
    Stream(#[from] ipcbridge_stream::Error),
    #[error("size exceeds local address space: {0}")]
    TooLarge(u64),
}
