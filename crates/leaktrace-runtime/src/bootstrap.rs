//! Static bump arena for allocations made while the real allocator is being
//! resolved.
//!
//! `dlsym` may call back into `malloc`/`calloc` before it has returned the
//! address of the real ones. Those requests are served from here. Memory is
//! never reclaimed; frees of arena addresses are ignored.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Size of the process-wide bootstrap arena.
pub const BOOTSTRAP_ARENA_SIZE: usize = 64 * 1024;

/// Allocation granularity and minimum alignment.
pub const BOOTSTRAP_GRANULE: usize = 16;

#[repr(C, align(16))]
struct Buffer<const N: usize>(UnsafeCell<[u8; N]>);

/// Lock-free bump allocator over a fixed inline buffer.
pub struct BootstrapArena<const N: usize> {
    buf: Buffer<N>,
    used: AtomicUsize,
}

// SAFETY: every byte range is handed out once, reserved by the CAS on `used`.
unsafe impl<const N: usize> Sync for BootstrapArena<N> {}

impl<const N: usize> BootstrapArena<N> {
    pub const fn new() -> Self {
        Self {
            buf: Buffer(UnsafeCell::new([0; N])),
            used: AtomicUsize::new(0),
        }
    }

    fn base(&self) -> usize {
        self.buf.0.get() as usize
    }

    /// Reserve `size` bytes aligned to `align` (at least 16). Null when the
    /// arena is exhausted or `align` is not a power of two.
    pub fn alloc(&self, size: usize, align: usize) -> *mut u8 {
        let align = align.max(BOOTSTRAP_GRANULE);
        if !align.is_power_of_two() {
            return ptr::null_mut();
        }
        let base = self.base();
        loop {
            let used = self.used.load(Ordering::Relaxed);
            let Some(start) = (base + used).checked_next_multiple_of(align) else {
                return ptr::null_mut();
            };
            let offset = start - base;
            let Some(end) = offset
                .checked_add(size.max(1))
                .and_then(|e| e.checked_next_multiple_of(BOOTSTRAP_GRANULE))
            else {
                return ptr::null_mut();
            };
            if end > N {
                return ptr::null_mut();
            }
            if self
                .used
                .compare_exchange_weak(used, end, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: offset < end <= N, so the pointer stays inside the buffer.
                return unsafe { self.buf.0.get().cast::<u8>().add(offset) };
            }
        }
    }

    /// Zero-filled allocation of `count * size` bytes.
    pub fn alloc_zeroed(&self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            return ptr::null_mut();
        };
        // The buffer starts zeroed and is never reused, so fresh ranges are
        // already zero.
        self.alloc(total, BOOTSTRAP_GRANULE)
    }

    /// Whether `p` points into this arena.
    pub fn contains(&self, p: *const u8) -> bool {
        let addr = p as usize;
        let base = self.base();
        addr >= base && addr < base + N
    }

    /// Bytes from `p` to the end of the arena; bounds copies out of arena
    /// blocks whose size is not recorded.
    pub fn bytes_after(&self, p: *const u8) -> usize {
        if self.contains(p) {
            self.base() + N - p as usize
        } else {
            0
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for BootstrapArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The arena used by the allocator shim.
pub static BOOTSTRAP_ARENA: BootstrapArena<BOOTSTRAP_ARENA_SIZE> = BootstrapArena::new();
