//! Process-scoped heap shared by remote allocations and dispatch scratch.
//!
//! The agent never reaches for ambient allocator state: every allocation it performs on behalf
//! of the operator, and every inline scratch buffer it needs to run a dispatch, goes through
//! one [Heap] passed to the [crate::Server].

use ipcbridge_protocol::Allocation;
use std::{
    ptr::NonNull,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Allocator backing the target's raw memory regions.
pub trait Heap {
    /// Allocate a region, returning `None` if the request cannot be satisfied.
    fn allocate(&self, request: Allocation) -> Option<NonNull<u8>>;

    /// Release a region.
    ///
    /// # Safety
    ///
    /// `ptr` is handed to the underlying allocator untouched. It must have been returned by
    /// [Heap::allocate] on this heap and not freed since; anything else is whatever the
    /// underlying allocator does with it.
    unsafe fn free(&self, ptr: *mut u8);
}

impl<H: Heap + ?Sized> Heap for &H {
    fn allocate(&self, request: Allocation) -> Option<NonNull<u8>> {
        (**self).allocate(request)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        (**self).free(ptr)
    }
}

/// The C heap of the agent process.
#[derive(Clone, Copy, Debug, Default)]
pub struct Native;

impl Heap for Native {
    fn allocate(&self, request: Allocation) -> Option<NonNull<u8>> {
        // Zero-sized requests still get a unique, freeable address
        let size = usize::try_from(request.size()).ok()?.max(1);
        let ptr = match request {
            Allocation::Plain { .. } => unsafe { libc::malloc(size) },
            Allocation::Zeroed { .. } => unsafe { libc::calloc(1, size) },
            Allocation::Aligned { align, .. } => {
                let align = usize::try_from(align).ok()?;
                // Zero asks for the allocator's minimum alignment
                if align != 0 && !align.is_power_of_two() {
                    return None;
                }
                let align = align.max(std::mem::size_of::<*mut libc::c_void>());
                let mut out = std::ptr::null_mut();
                if unsafe { libc::posix_memalign(&mut out, align, size) } != 0 {
                    return None;
                }
                out
            }
        };
        NonNull::new(ptr.cast())
    }

    unsafe fn free(&self, ptr: *mut u8) {
        libc::free(ptr.cast());
    }
}

/// Allocation counters shared between a [Counting] heap and its observers.
#[derive(Debug, Default)]
pub struct Stats {
    allocations: AtomicUsize,
    frees: AtomicUsize,
}

impl Stats {
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Relaxed)
    }

    /// Allocations not yet freed.
    pub fn outstanding(&self) -> usize {
        self.allocations().saturating_sub(self.frees())
    }
}

/// A [Heap] wrapper that counts successful allocations and frees.
pub struct Counting<H> {
    inner: H,
    stats: Arc<Stats>,
}

impl<H: Heap> Counting<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            stats: Arc::new(Stats::default()),
        }
    }

    /// Handle to the counters, valid after the heap is moved elsewhere.
    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }
}

impl<H: Heap> Heap for Counting<H> {
    fn allocate(&self, request: Allocation) -> Option<NonNull<u8>> {
        let ptr = self.inner.allocate(request)?;
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        Some(ptr)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        self.stats.frees.fetch_add(1, Ordering::Relaxed);
        self.inner.free(ptr);
    }
}
