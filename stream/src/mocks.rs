//! In-memory transports for testing.

use bytes::{Buf, Bytes};
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Condvar, Mutex},
};

#[derive(Default)]
struct State {
    buffer: VecDeque<u8>,
    closed: bool,
}

/// A one-directional, blocking byte pipe.
#[derive(Default)]
struct Pipe {
    state: Mutex<State>,
    ready: Condvar,
}

impl Pipe {
    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.ready.notify_all();
    }
}

/// One end of an in-memory duplex transport created by [duplex].
///
/// Reads block until the peer writes or drops its endpoint (after which reads return
/// end-of-file). Writes fail with [io::ErrorKind::BrokenPipe] once the peer is dropped.
pub struct Endpoint {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
}

/// Create a connected pair of in-memory endpoints.
///
/// Each endpoint may be moved to its own thread.
pub fn duplex() -> (Endpoint, Endpoint) {
    let a = Arc::new(Pipe::default());
    let b = Arc::new(Pipe::default());
    (
        Endpoint {
            incoming: a.clone(),
            outgoing: b.clone(),
        },
        Endpoint {
            incoming: b,
            outgoing: a,
        },
    )
}

impl io::Read for Endpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.incoming.state.lock().unwrap();
        while state.buffer.is_empty() && !state.closed {
            state = self.incoming.ready.wait(state).unwrap();
        }
        let n = buf.len().min(state.buffer.len());
        for (dst, src) in buf.iter_mut().zip(state.buffer.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl io::Write for Endpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.outgoing.state.lock().unwrap();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"));
        }
        state.buffer.extend(buf);
        self.outgoing.ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.outgoing.close();
        self.incoming.close();
    }
}

/// A transport that replays a fixed input script and records everything written to it.
///
/// Reading past the end of the script fails with [io::ErrorKind::UnexpectedEof], so a consumer
/// that reads more than it should is detected immediately.
pub struct Scripted {
    input: Bytes,
    output: Vec<u8>,
    reads: Vec<usize>,
    writes: Vec<usize>,
}

impl Scripted {
    pub fn new(input: impl Into<Bytes>) -> Self {
        Self {
            input: input.into(),
            output: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Bytes of the script not yet consumed.
    pub fn remaining(&self) -> usize {
        self.input.remaining()
    }

    /// Everything written so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Requested length of every read call.
    pub fn reads(&self) -> &[usize] {
        &self.reads
    }

    /// Length of every write call.
    pub fn writes(&self) -> &[usize] {
        &self.writes
    }
}

impl io::Read for Scripted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.push(buf.len());
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.input.has_remaining() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "script exhausted",
            ));
        }
        let n = buf.len().min(self.input.remaining());
        self.input.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

impl io::Write for Scripted {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.push(buf.len());
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
