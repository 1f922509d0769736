//! Remote-controlled allocation, release and access of raw target memory.
//!
//! The operator is the sole authority over the lifetime of the regions it allocates: nothing
//! here tracks outstanding regions, validates addresses, or guards against double frees.
//! Unrestricted access to the target's memory is the point of the bridge.

use crate::{heap::Heap, Error};
use ipcbridge_protocol::{memory::KIND_PADDING, Address, AllocateKind, Allocation, Status};
use ipcbridge_stream::Channel;
use std::{io, ptr::NonNull, slice};
use tracing::{debug, warn};

/// A target memory region named only by its address.
///
/// Holding a [RawRegion] grants nothing: it is a capability to touch arbitrary memory that is
/// only as valid as the address the operator supplied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawRegion {
    address: Address,
    len: usize,
}

impl RawRegion {
    pub const fn new(address: Address, len: usize) -> Self {
        Self { address, len }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the region as bytes.
    ///
    /// # Safety
    ///
    /// The region must be readable for `len` bytes and not mutated for the lifetime of the
    /// returned slice.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.len == 0 {
            return &[];
        }
        slice::from_raw_parts(self.address as usize as *const u8, self.len)
    }

    /// View the region as mutable bytes.
    ///
    /// # Safety
    ///
    /// The region must be writable for `len` bytes and not otherwise accessed for the lifetime
    /// of the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        slice::from_raw_parts_mut(self.address as usize as *mut u8, self.len)
    }
}

/// Zero-filled memory borrowed from a [Heap] for the duration of one call.
///
/// The memory is returned to the heap when the guard is dropped, on every exit path.
pub struct Scratch<'a, H: Heap> {
    heap: &'a H,
    ptr: Option<NonNull<u8>>,
    len: usize,
}

impl<'a, H: Heap> Scratch<'a, H> {
    /// Allocate `len` bytes, or return `None` if the heap is exhausted.
    ///
    /// An empty buffer does not touch the heap.
    pub fn new(heap: &'a H, len: usize) -> Option<Self> {
        let ptr = match len {
            0 => None,
            _ => Some(heap.allocate(Allocation::Zeroed { size: len as u64 })?),
        };
        Some(Self { heap, ptr, len })
    }

    /// Target address of the buffer (zero when empty).
    pub fn address(&self) -> Address {
        self.ptr.map_or(0, |ptr| ptr.as_ptr() as usize as Address)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn region(&self) -> RawRegion {
        RawRegion::new(self.address(), self.len)
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.ptr {
            // SAFETY: owned, initialized allocation of `len` bytes
            Some(ptr) => unsafe { slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.ptr {
            // SAFETY: owned, initialized allocation of `len` bytes
            Some(ptr) => unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.len) },
            None => &mut [],
        }
    }
}

impl<H: Heap> Drop for Scratch<'_, H> {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: allocated by this heap in `new` and freed only here
            unsafe { self.heap.free(ptr.as_ptr()) };
        }
    }
}

/// Convert a wire length into a local one.
fn local_len(size: u64) -> Option<usize> {
    usize::try_from(size).ok()
}

/// Serve an Allocate request.
pub fn allocate<T, H>(channel: &mut Channel<T>, heap: &H) -> Result<(), Error>
where
    T: io::Read + io::Write,
    H: Heap,
{
    let kind: u8 = channel.recv()?;
    channel.discard(KIND_PADDING as u64)?;
    let size: u64 = channel.recv()?;
    let request = match AllocateKind::try_from(kind) {
        Ok(AllocateKind::Plain) => Allocation::Plain { size },
        Ok(AllocateKind::Zeroed) => Allocation::Zeroed { size },
        Ok(AllocateKind::Aligned) => Allocation::Aligned {
            size,
            align: channel.recv()?,
        },
        Err(kind) => {
            warn!(kind, size, "unknown allocation kind");
            channel.send_value(&Status::INVALID_ARGUMENT)?;
            return Ok(());
        }
    };

    let Some(ptr) = heap.allocate(request) else {
        warn!(?request, "allocation failed");
        channel.send_value(&Status::OUT_OF_MEMORY)?;
        return Ok(());
    };
    let address = ptr.as_ptr() as usize as Address;
    debug!(?request, address, "allocated region");
    channel.send_value(&Status::SUCCESS)?;
    channel.send_value(&address)?;
    Ok(())
}

/// Serve a Free request.
pub fn free<T, H>(channel: &mut Channel<T>, heap: &H) -> Result<(), Error>
where
    T: io::Read + io::Write,
    H: Heap,
{
    let address: Address = channel.recv()?;

    // SAFETY: none; the operator owns region lifetimes and any address is passed through
    unsafe { heap.free(address as usize as *mut u8) };
    debug!(address, "freed region");
    channel.send_value(&Status::SUCCESS)?;
    Ok(())
}

/// Serve a Read request.
pub fn read<T: io::Read + io::Write>(channel: &mut Channel<T>) -> Result<(), Error> {
    let address: Address = channel.recv()?;
    let size: u64 = channel.recv()?;
    let Some(len) = local_len(size) else {
        warn!(address, size, "read exceeds address space");
        channel.send_value(&Status::INVALID_ARGUMENT)?;
        return Ok(());
    };

    let region = RawRegion::new(address, len);
    debug!(address, size, "reading region");
    channel.send_value(&Status::SUCCESS)?;

    // SAFETY: none; the operator vouches for the region
    channel.send(unsafe { region.as_slice() })?;
    Ok(())
}

/// Serve a Write request.
pub fn write<T: io::Read + io::Write>(channel: &mut Channel<T>) -> Result<(), Error> {
    let address: Address = channel.recv()?;
    let size: u64 = channel.recv()?;
    let Some(len) = local_len(size) else {
        warn!(address, size, "write exceeds address space");
        channel.discard(size)?;
        channel.send_value(&Status::INVALID_ARGUMENT)?;
        return Ok(());
    };

    let region = RawRegion::new(address, len);

    // SAFETY: none; the operator vouches for the region
    channel.recv_into(unsafe { region.as_mut_slice() })?;
    debug!(address, size, "wrote region");
    channel.send_value(&Status::SUCCESS)?;
    Ok(())
}
