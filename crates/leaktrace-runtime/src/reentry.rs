//! Per-thread reentrancy guard.
//!
//! While a thread is inside the tracer's own bookkeeping (capturing a
//! backtrace, updating registries, writing a report) every allocation it
//! makes must go straight to the real allocator. The guard is a plain depth
//! counter; the first `enter` wins and nested callers get `None`.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static TRACKING_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Held while the current thread performs tracer bookkeeping.
pub struct ReentryGuard {
    // Tied to the thread-local counter.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        let _ = TRACKING_DEPTH.try_with(|depth| {
            depth.set(depth.get().saturating_sub(1));
        });
    }
}

/// Enter bookkeeping on this thread, or `None` if already inside.
///
/// Also returns `None` once the thread's TLS has been torn down, so late
/// allocations during thread exit are passed through untracked.
#[inline]
pub fn enter() -> Option<ReentryGuard> {
    TRACKING_DEPTH
        .try_with(|depth| {
            if depth.get() > 0 {
                None
            } else {
                depth.set(1);
                Some(ReentryGuard {
                    _not_send: PhantomData,
                })
            }
        })
        .ok()
        .flatten()
}

/// Whether the current thread is inside bookkeeping.
#[inline]
pub fn is_active() -> bool {
    TRACKING_DEPTH.try_with(|d| d.get() > 0).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_enter_is_refused() {
        assert!(!is_active());
        let outer = enter().expect("first enter succeeds");
        assert!(is_active());
        assert!(enter().is_none());
        drop(outer);
        assert!(!is_active());
        assert!(enter().is_some());
    }

    #[test]
    fn guard_is_per_thread() {
        let _held = enter().unwrap();
        let other = std::thread::spawn(|| enter().is_some()).join().unwrap();
        assert!(other);
    }
}
