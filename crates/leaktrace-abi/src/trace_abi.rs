//! ABI layer for explicit tracing windows (`leaktrace_start`,
//! `leaktrace_stop`).
//!
//! Labels are copied under the reentrancy guard, so the strings a window
//! keeps for its report never show up as leaks in an enclosing window.

use std::ffi::{c_char, c_uint};

use leaktrace_runtime::reentry;
use leaktrace_runtime::session::SessionHandle;

use crate::util::site_label;

/// Handle returned when tracing is not initialized.
pub const INVALID_HANDLE: usize = usize::MAX;

/// Open a tracing window labelled with the caller's location.
///
/// Returns [`INVALID_HANDLE`] when tracing is not active.
///
/// # Safety
///
/// `origin_file` and `origin_function` must each be null or a readable C
/// string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn leaktrace_start(
    origin_file: *const c_char,
    origin_function: *const c_char,
    origin_line: c_uint,
) -> usize {
    if !leaktrace_runtime::is_active() {
        return INVALID_HANDLE;
    }
    let _guard = reentry::enter();
    // SAFETY: forwarded caller contract.
    let label = unsafe { site_label(origin_file, origin_function, origin_line) };
    match leaktrace_runtime::start_trace(label) {
        Some(handle) => usize::try_from(handle.0).unwrap_or(INVALID_HANDLE),
        None => INVALID_HANDLE,
    }
}

/// Close the window `handle` and print its report on stdout. Unknown or
/// already closed handles are ignored.
///
/// # Safety
///
/// `end_file` and `end_function` must each be null or a readable C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn leaktrace_stop(
    handle: usize,
    end_file: *const c_char,
    end_function: *const c_char,
    end_line: c_uint,
) {
    if handle == INVALID_HANDLE {
        return;
    }
    let _guard = reentry::enter();
    // SAFETY: forwarded caller contract.
    let label = unsafe { site_label(end_file, end_function, end_line) };
    let _ = leaktrace_runtime::stop_trace(SessionHandle(handle as u64), label);
}
