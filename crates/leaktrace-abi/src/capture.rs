//! Call-stack capture for allocation records.

use leaktrace_core::{BACKTRACE_DEPTH, Backtrace};

/// Frames inspected while looking for the entry point before giving up and
/// keeping the innermost frames as they are.
const ENTRY_SEARCH_LIMIT: usize = 32;

/// Capture up to [`BACKTRACE_DEPTH`] return addresses above the frame of the
/// function starting at `entry`.
///
/// Frames belonging to the unwinder and to the shim itself are dropped by
/// skipping everything up to and including `entry`'s frame. If that frame is
/// not found the innermost frames are kept.
#[inline(never)]
pub fn capture(entry: usize) -> Backtrace {
    let mut above = [0usize; BACKTRACE_DEPTH];
    let mut above_len = 0;
    let mut innermost = [0usize; BACKTRACE_DEPTH];
    let mut innermost_len = 0;
    let mut scanned = 0;
    let mut seen_entry = false;

    // SAFETY: `_Unwind_Backtrace` is thread-safe on Linux. The crate-level
    // lock taken by `backtrace::trace` is skipped because a forked child
    // can inherit it held by a thread that no longer exists.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            let ip = frame.ip() as usize;
            if ip == 0 {
                return false;
            }
            if seen_entry {
                above[above_len] = ip;
                above_len += 1;
                return above_len < BACKTRACE_DEPTH;
            }
            if innermost_len < BACKTRACE_DEPTH {
                innermost[innermost_len] = ip;
                innermost_len += 1;
            }
            if entry != 0 && frame.symbol_address() as usize == entry {
                seen_entry = true;
            }
            scanned += 1;
            seen_entry || scanned < ENTRY_SEARCH_LIMIT
        });
    }

    if seen_entry {
        Backtrace::from_frames(&above[..above_len])
    } else {
        Backtrace::from_frames(&innermost[..innermost_len])
    }
}

/// Run the unwinder once so its lazy setup (which may allocate and take
/// loader locks) happens before any allocation is tracked.
pub fn warm_up() {
    let _ = capture(0);
}
