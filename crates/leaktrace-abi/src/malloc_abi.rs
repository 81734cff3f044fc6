//! ABI layer for the allocator entry points (`malloc`, `free`, `calloc`,
//! `realloc` and the aligned variants).
//!
//! Every call is delegated to the next definition in lookup order and its
//! result is returned unchanged. Successful allocations are recorded in all
//! open tracing windows. `free` removes the record before the memory is
//! released, so a concurrent allocation reusing the address cannot be
//! dropped by a late removal. A moving `realloc` can only learn the outcome
//! afterwards and updates the windows once the real call returns.
//!
//! In test mode, this module is suppressed to avoid shadowing the system
//! allocator (which would cause infinite recursion in the test binary itself).

use std::ffi::{c_int, c_void};
use std::ptr;

use leaktrace_runtime::bootstrap::{BOOTSTRAP_ARENA, BOOTSTRAP_GRANULE};
use leaktrace_runtime::reentry;

use crate::capture;
use crate::resolver::{self, RealFns};
use crate::tracking::{self, ReallocEffect};
use crate::util::fatal;

// ---------------------------------------------------------------------------
// Bookkeeping
// ---------------------------------------------------------------------------

#[inline]
fn track_alloc(ptr: *mut c_void, size: usize, entry: usize) {
    if ptr.is_null() || !leaktrace_runtime::is_active() {
        return;
    }
    let Some(_guard) = reentry::enter() else {
        return;
    };
    let backtrace = capture::capture(entry);
    leaktrace_runtime::on_alloc(ptr as usize, size, &backtrace);
}

#[inline]
fn track_free(ptr: *mut c_void) {
    if ptr.is_null() || !leaktrace_runtime::is_active() {
        return;
    }
    let Some(_guard) = reentry::enter() else {
        return;
    };
    leaktrace_runtime::on_free(ptr as usize);
}

#[inline]
fn in_bootstrap(ptr: *mut c_void) -> bool {
    BOOTSTRAP_ARENA.contains(ptr.cast_const().cast())
}

/// Serve a request made while the resolver is inside `dlsym`.
fn bootstrap_alloc(size: usize, align: usize) -> *mut c_void {
    let p = BOOTSTRAP_ARENA.alloc(size, align);
    if p.is_null() {
        fatal(&[b"bootstrap arena exhausted during symbol resolution"]);
    }
    p.cast()
}

fn bootstrap_calloc(nmemb: usize, size: usize) -> *mut c_void {
    if nmemb.checked_mul(size).is_none() {
        set_errno(libc::ENOMEM);
        return ptr::null_mut();
    }
    let p = BOOTSTRAP_ARENA.alloc_zeroed(nmemb, size);
    if p.is_null() {
        fatal(&[b"bootstrap arena exhausted during symbol resolution"]);
    }
    p.cast()
}

#[inline]
fn set_errno(code: c_int) {
    // SAFETY: __errno_location returns this thread's errno slot.
    unsafe { *libc::__errno_location() = code };
}

#[inline]
fn valid_alignment(align: usize) -> bool {
    align.is_power_of_two()
}

/// Move a bootstrap block to the real heap. The old block stays in the arena.
unsafe fn realloc_out_of_bootstrap(
    real: &RealFns,
    old: *mut c_void,
    size: usize,
    entry: usize,
) -> *mut c_void {
    // SAFETY: delegated to the real allocator.
    let new = unsafe { (real.malloc)(size) };
    if new.is_null() {
        return new;
    }
    // Arena blocks carry no size; the copy is bounded by the arena's end.
    let len = size.min(BOOTSTRAP_ARENA.bytes_after(old.cast_const().cast()));
    // SAFETY: `len` bytes are readable at `old` and writable at `new`.
    unsafe { ptr::copy_nonoverlapping(old.cast::<u8>(), new.cast::<u8>(), len) };
    track_alloc(new, size, entry);
    new
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    let Some(real) = resolver::real() else {
        return bootstrap_alloc(size, BOOTSTRAP_GRANULE);
    };
    // SAFETY: delegated to the real allocator.
    let p = unsafe { (real.malloc)(size) };
    track_alloc(p, size, malloc as *const () as usize);
    p
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    let Some(real) = resolver::real() else {
        return bootstrap_calloc(nmemb, size);
    };
    // SAFETY: delegated to the real allocator.
    let p = unsafe { (real.calloc)(nmemb, size) };
    // A non-null result means the product did not overflow.
    track_alloc(p, nmemb.wrapping_mul(size), calloc as *const () as usize);
    p
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    let Some(real) = resolver::real() else {
        let new = bootstrap_alloc(size, BOOTSTRAP_GRANULE);
        if !ptr.is_null() && in_bootstrap(ptr) {
            let len = size.min(BOOTSTRAP_ARENA.bytes_after(ptr.cast_const().cast()));
            // SAFETY: both ranges lie inside the arena; `copy` tolerates the
            // overlap left by the unknown old size.
            unsafe { ptr::copy(ptr.cast::<u8>(), new.cast::<u8>(), len) };
        }
        return new;
    };
    let entry = realloc as *const () as usize;

    if !ptr.is_null() && in_bootstrap(ptr) {
        // SAFETY: `ptr` is an arena block.
        return unsafe { realloc_out_of_bootstrap(real, ptr, size, entry) };
    }

    // SAFETY: delegated to the real allocator.
    let new = unsafe { (real.realloc)(ptr, size) };
    match tracking::realloc_effect(ptr as usize, new as usize, size) {
        ReallocEffect::Keep => {}
        ReallocEffect::Record => track_alloc(new, size, entry),
        ReallocEffect::Forget => track_free(ptr),
        ReallocEffect::Move => {
            track_free(ptr);
            track_alloc(new, size, entry);
        }
    }
    new
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if !tracking::releases(ptr as usize, in_bootstrap(ptr)) {
        return;
    }
    let Some(real) = resolver::real() else {
        // Only reachable from inside dlsym, before any real block exists.
        return;
    };
    track_free(ptr);
    // SAFETY: delegated to the real allocator.
    unsafe { (real.free)(ptr) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfree(ptr: *mut c_void) {
    if !tracking::releases(ptr as usize, in_bootstrap(ptr)) {
        return;
    }
    let Some(real) = resolver::real() else {
        return;
    };
    track_free(ptr);
    // SAFETY: delegated to the real allocator.
    unsafe { (real.cfree.unwrap_or(real.free))(ptr) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    let Some(real) = resolver::real() else {
        if !valid_alignment(alignment) {
            set_errno(libc::EINVAL);
            return ptr::null_mut();
        }
        return bootstrap_alloc(size, alignment);
    };
    // SAFETY: delegated to the real allocator.
    let p = unsafe { (real.memalign)(alignment, size) };
    track_alloc(p, size, memalign as *const () as usize);
    p
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    let Some(real) = resolver::real() else {
        if !valid_alignment(alignment) {
            set_errno(libc::EINVAL);
            return ptr::null_mut();
        }
        return bootstrap_alloc(size, alignment);
    };
    // SAFETY: delegated to the real allocator.
    let p = unsafe { (real.aligned_alloc)(alignment, size) };
    track_alloc(p, size, aligned_alloc as *const () as usize);
    p
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> c_int {
    if memptr.is_null() {
        return libc::EINVAL;
    }
    let Some(real) = resolver::real() else {
        if !valid_alignment(alignment) || alignment % size_of::<*mut c_void>() != 0 {
            return libc::EINVAL;
        }
        // SAFETY: `memptr` was checked for null.
        unsafe { *memptr = bootstrap_alloc(size, alignment) };
        return 0;
    };
    // SAFETY: delegated to the real allocator.
    let rc = unsafe { (real.posix_memalign)(memptr, alignment, size) };
    if rc == 0 {
        // SAFETY: success means the real allocator stored a block at `memptr`.
        track_alloc(unsafe { *memptr }, size, posix_memalign as *const () as usize);
    }
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    let Some(real) = resolver::real() else {
        return bootstrap_alloc(size, 4096);
    };
    // SAFETY: delegated to the real allocator.
    let p = unsafe {
        match real.valloc {
            Some(f) => f(size),
            None => (real.memalign)(real.page_size, size),
        }
    };
    track_alloc(p, size, valloc as *const () as usize);
    p
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pvalloc(size: usize) -> *mut c_void {
    let Some(real) = resolver::real() else {
        return bootstrap_alloc(size, 4096);
    };
    let Some(rounded) = tracking::page_rounded(size, real.page_size) else {
        set_errno(libc::ENOMEM);
        return ptr::null_mut();
    };
    // SAFETY: delegated to the real allocator.
    let p = unsafe {
        match real.pvalloc {
            Some(f) => f(size),
            None => (real.memalign)(real.page_size, rounded),
        }
    };
    track_alloc(p, rounded, pvalloc as *const () as usize);
    p
}
