//! Codec utility functions

use crate::Error;
use bytes::{Buf, BufMut};

/// Checks if the buffer has at least `len` bytes remaining. Returns an [Error::EndOfBuffer] if not.
#[inline]
pub fn at_least<B: Buf>(buf: &mut B, len: usize) -> Result<(), Error> {
    let rem = buf.remaining();
    if rem < len {
        return Err(Error::EndOfBuffer);
    }
    Ok(())
}

/// Writes `len` zero bytes of alignment padding.
#[inline]
pub fn write_padding<B: BufMut>(buf: &mut B, len: usize) {
    buf.put_bytes(0, len);
}

/// Skips `len` bytes of alignment padding. Their contents are ignored.
#[inline]
pub fn read_padding<B: Buf>(buf: &mut B, len: usize) -> Result<(), Error> {
    at_least(buf, len)?;
    buf.advance(len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding() {
        let mut buf = Vec::new();
        write_padding(&mut buf, 3);
        assert_eq!(buf, [0, 0, 0]);

        let mut raw = &[0xffu8, 0xee, 7][..];
        read_padding(&mut raw, 2).unwrap();
        assert_eq!(raw, [7]);
        assert!(matches!(
            read_padding(&mut raw, 2),
            Err(Error::EndOfBuffer)
        ));
    }
}
