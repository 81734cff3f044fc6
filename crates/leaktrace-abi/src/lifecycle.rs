//! Load, exit and fork hooks.
//!
//! On load: resolve the real allocator, warm up the unwinder, register the
//! fork child handler and open the whole-process window. On exit: close
//! every open window and report it.

use leaktrace_runtime::log::{self, LogEntry, LogLevel};

use crate::{capture, resolver};

#[ctor::ctor]
fn leaktrace_load() {
    if resolver::real().is_none() {
        return;
    }
    capture::warm_up();
    // SAFETY: registers a plain `extern "C"` callback with no captured state.
    let rc = unsafe { libc::pthread_atfork(None, None, Some(after_fork_child)) };
    if rc != 0 {
        log::log(LogEntry::new(LogLevel::Warn, "atfork_register_failed"));
    }
    leaktrace_runtime::activate();
}

#[ctor::dtor]
fn leaktrace_unload() {
    leaktrace_runtime::shutdown();
}

unsafe extern "C" fn after_fork_child() {
    if leaktrace_runtime::is_active() {
        // SAFETY: runs as the atfork child handler, where only this thread
        // exists.
        unsafe { leaktrace_runtime::after_fork_child() };
    }
}
