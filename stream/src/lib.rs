//! Move exact byte counts over a blocking, ordered transport.
//!
//! A [Channel] wraps any [std::io::Read] + [std::io::Write] transport (a USB pipe, a TCP
//! socket, an in-memory [mocks] pipe) and transfers exactly the number of bytes requested,
//! splitting every transfer into operations no larger than the configured maximum transfer
//! unit. There is no framing: message boundaries are defined by the fixed layouts of whatever
//! protocol runs on top.
//!
//! A failed transfer leaves the stream at an unknown position. Callers are expected to treat
//! every [Error::Io] as fatal for the connection.

pub mod mocks;

use bytes::Bytes;
use ipcbridge_codec::{DecodeExt, Encode, Error as CodecError, FixedSize, Read};
use std::io;
use thiserror::Error;
use tracing::trace;

/// Default maximum transfer unit, in bytes.
pub const DEFAULT_MAX_TRANSFER_UNIT: usize = 0xe00;

/// Errors that can occur when interacting with a [Channel].
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport failed: {0}")]
    Io(#[from] io::Error),
    #[error("unable to decode: {0}")]
    Codec(#[from] CodecError),
}

/// Configuration for a [Channel].
///
/// # Warning
///
/// Both ends of a link may use different transfer units, but each must respect the limits of
/// the physical link they share.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Maximum number of bytes moved by a single underlying read or write.
    pub max_transfer_unit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_transfer_unit: DEFAULT_MAX_TRANSFER_UNIT,
        }
    }
}

/// A blocking, ordered byte stream with chunked transfers.
pub struct Channel<T> {
    inner: T,
    max_transfer_unit: usize,
}

impl<T: io::Read + io::Write> Channel<T> {
    /// Wrap a transport.
    ///
    /// # Panics
    ///
    /// Panics if `config.max_transfer_unit` is zero.
    pub fn new(inner: T, config: Config) -> Self {
        assert!(
            config.max_transfer_unit > 0,
            "max_transfer_unit must be non-zero"
        );
        Self {
            inner,
            max_transfer_unit: config.max_transfer_unit,
        }
    }

    /// Fill `buf` completely from the transport.
    pub fn recv_into(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        for chunk in buf.chunks_mut(self.max_transfer_unit) {
            self.inner.read_exact(chunk)?;
            trace!(len = chunk.len(), "received chunk");
        }
        Ok(())
    }

    /// Receive exactly `len` bytes.
    pub fn recv_bytes(&mut self, len: usize) -> Result<Bytes, Error> {
        let mut buf = vec![0u8; len];
        self.recv_into(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Receive and decode one fixed-size value.
    pub fn recv<V: Read<Cfg = ()> + FixedSize>(&mut self) -> Result<V, Error> {
        let mut buf = vec![0u8; V::SIZE];
        self.recv_into(&mut buf)?;
        Ok(V::decode(&buf[..])?)
    }

    /// Consume and drop exactly `len` bytes.
    pub fn discard(&mut self, len: u64) -> Result<(), Error> {
        let mut remaining = len;
        let mut scratch = vec![0u8; (self.max_transfer_unit as u64).min(len) as usize];
        while remaining > 0 {
            let n = (scratch.len() as u64).min(remaining) as usize;
            self.inner.read_exact(&mut scratch[..n])?;
            remaining -= n as u64;
        }
        trace!(len, "discarded bytes");
        Ok(())
    }

    /// Send all of `buf` to the transport.
    pub fn send(&mut self, buf: &[u8]) -> Result<(), Error> {
        for chunk in buf.chunks(self.max_transfer_unit) {
            self.inner.write_all(chunk)?;
            trace!(len = chunk.len(), "sent chunk");
        }
        self.inner.flush()?;
        Ok(())
    }

    /// Encode and send one value.
    pub fn send_value<V: Encode>(&mut self, value: &V) -> Result<(), Error> {
        self.send(&value.encode())
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::Scripted;
    use ipcbridge_macros::test_traced;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const MTU: usize = 16;

    fn config() -> Config {
        Config {
            max_transfer_unit: MTU,
        }
    }

    #[test_traced]
    fn test_recv_chunks_bounded_by_mtu() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut data = [0u8; 100];
        rng.fill(&mut data[..]);

        let mut channel = Channel::new(Scripted::new(data.to_vec()), config());
        let received = channel.recv_bytes(data.len()).unwrap();
        assert_eq!(received.as_ref(), &data[..]);

        let reads = channel.get_ref().reads();
        assert!(reads.iter().all(|n| *n <= MTU));
        assert_eq!(reads.iter().sum::<usize>(), data.len());
        assert_eq!(channel.get_ref().remaining(), 0);
    }

    #[test_traced]
    fn test_send_chunks_bounded_by_mtu() {
        let data: Vec<u8> = (0..=255u8).cycle().take(70).collect();
        let mut channel = Channel::new(Scripted::new(Vec::new()), config());
        channel.send(&data).unwrap();

        let writes = channel.get_ref().writes();
        assert_eq!(writes, &[16, 16, 16, 16, 6]);
        assert_eq!(channel.get_ref().output(), &data[..]);
    }

    #[test]
    fn test_recv_value() {
        let mut channel = Channel::new(Scripted::new(vec![0x78, 0x56, 0x34, 0x12, 0xff]), config());
        assert_eq!(channel.recv::<u32>().unwrap(), 0x1234_5678);
        assert_eq!(channel.get_ref().remaining(), 1);
    }

    #[test]
    fn test_recv_invalid_value() {
        let mut channel = Channel::new(Scripted::new(vec![7]), config());
        assert!(matches!(
            channel.recv::<bool>(),
            Err(Error::Codec(CodecError::InvalidBool))
        ));
    }

    #[test]
    fn test_recv_exhausted_is_io_error() {
        let mut channel = Channel::new(Scripted::new(vec![1, 2, 3]), config());
        assert!(matches!(channel.recv::<u64>(), Err(Error::Io(_))));
    }

    #[test]
    fn test_discard() {
        let mut channel = Channel::new(Scripted::new(vec![9u8; 40]), config());
        channel.discard(39).unwrap();
        assert_eq!(channel.get_ref().remaining(), 1);
        assert!(channel.get_ref().reads().iter().all(|n| *n <= MTU));

        channel.discard(0).unwrap();
        assert!(matches!(channel.discard(2), Err(Error::Io(_))));
    }

    #[test]
    fn test_send_value() {
        let mut channel = Channel::new(Scripted::new(Vec::new()), config());
        channel.send_value(&0x0102u16).unwrap();
        channel.send_value(&true).unwrap();
        assert_eq!(channel.into_inner().output(), &[0x02, 0x01, 0x01]);
    }

    #[test]
    #[should_panic(expected = "max_transfer_unit must be non-zero")]
    fn test_zero_mtu() {
        Channel::new(
            Scripted::new(Vec::new()),
            Config {
                max_transfer_unit: 0,
            },
        );
    }
}
