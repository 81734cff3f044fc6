//! # leaktrace-runtime
//!
//! Process-wide tracer state sitting between the exported allocator symbols
//! and the safe core: configuration, structured logging, the per-thread
//! reentrancy guard, the bootstrap arena, the session table and the leak
//! reporter.
//!
//! The allocator shim calls [`on_alloc`] / [`on_free`] while holding the
//! reentrancy guard. Load and exit hooks call [`activate`] and [`shutdown`].

pub mod bootstrap;
pub mod config;
pub mod log;
pub mod reentry;
pub mod reporter;
pub mod session;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use leaktrace_core::{Backtrace, LeakSummary, SiteLabel};
use serde_json::json;

use crate::log::{LogEntry, LogLevel};
use crate::reporter::LeakReporter;
use crate::session::{ClosedSession, SessionHandle, SessionManager};

/// The process-wide session table.
pub static SESSIONS: SessionManager = SessionManager::new();

static ACTIVE: AtomicBool = AtomicBool::new(false);

const NO_SESSION: u64 = u64::MAX;
static PROCESS_SESSION: AtomicU64 = AtomicU64::new(NO_SESSION);

/// Whether tracing has been activated and not yet shut down.
#[inline]
pub fn is_active() -> bool {
    ACTIVE.load(Ordering::Acquire)
}

/// Open the whole-process window. Later calls are no-ops.
pub fn activate() {
    let _guard = reentry::enter();
    if ACTIVE.swap(true, Ordering::AcqRel) {
        return;
    }
    let handle = SESSIONS.start(SiteLabel::process_start());
    PROCESS_SESSION.store(handle.0, Ordering::Release);
    log::log(LogEntry::new(LogLevel::Info, "session_start").with_session(handle.0));
}

/// Handle of the whole-process window, if open.
pub fn process_session() -> Option<SessionHandle> {
    match PROCESS_SESSION.load(Ordering::Acquire) {
        NO_SESSION => None,
        id => Some(SessionHandle(id)),
    }
}

/// Open a tracing window. `None` when tracing is not active.
pub fn start_trace(opened_at: SiteLabel) -> Option<SessionHandle> {
    if !is_active() {
        return None;
    }
    let _guard = reentry::enter();
    let handle = SESSIONS.start(opened_at);
    if log::enabled(LogLevel::Info) {
        log::log(LogEntry::new(LogLevel::Info, "session_start").with_session(handle.0));
    }
    Some(handle)
}

/// Close a tracing window and print its report on stdout.
///
/// Unknown or already closed handles return `None`.
pub fn stop_trace(handle: SessionHandle, closed_at: SiteLabel) -> Option<LeakSummary> {
    let _guard = reentry::enter();
    let closed = SESSIONS.stop(handle, closed_at)?;
    if log::enabled(LogLevel::Info) {
        log::log(LogEntry::new(LogLevel::Info, "session_stop").with_session(closed.id));
    }
    report_closed(&closed)
}

/// Record an allocation in every open window.
#[inline]
pub fn on_alloc(address: usize, size: usize, backtrace: &Backtrace) {
    SESSIONS.record_alloc(address, size, backtrace);
}

/// Forget an allocation in every open window.
#[inline]
pub fn on_free(address: usize) {
    SESSIONS.record_free(address);
}

/// Reinitialize in the child after `fork`.
///
/// # Safety
///
/// Must run in the child with no other thread alive, as a `pthread_atfork`
/// child handler does.
pub unsafe fn after_fork_child() {
    let _guard = reentry::enter();
    // SAFETY: forwarded from the caller.
    let handle = unsafe { SESSIONS.reset_after_fork() };
    PROCESS_SESSION.store(handle.0, Ordering::Release);
    if log::enabled(LogLevel::Info) {
        log::log(
            LogEntry::new(LogLevel::Info, "fork_child_reset")
                .with_session(handle.0)
                .with_details(json!({ "pid": std::process::id() })),
        );
    }
}

/// Close every open window, report each, and stop tracing.
pub fn shutdown() -> Vec<LeakSummary> {
    let _guard = reentry::enter();
    if !ACTIVE.swap(false, Ordering::AcqRel) {
        return Vec::new();
    }
    PROCESS_SESSION.store(NO_SESSION, Ordering::Release);
    let closed = SESSIONS.stop_all(&SiteLabel::process_exit());
    let summaries: Vec<LeakSummary> = closed.iter().filter_map(report_closed).collect();
    log::log(
        LogEntry::new(LogLevel::Info, "process_exit").with_details(json!({
            "sessions": summaries.len(),
            "leaked_bytes": summaries.iter().map(|s| s.leaked_bytes).sum::<usize>(),
        })),
    );
    summaries
}

fn report_closed(closed: &ClosedSession) -> Option<LeakSummary> {
    let reporter = LeakReporter::from_config();
    match reporter.report(closed, &mut std::io::stdout().lock()) {
        Ok(summary) => Some(summary),
        Err(err) => {
            log::log(
                LogEntry::new(LogLevel::Warn, "report_io_failed")
                    .with_session(closed.id)
                    .with_details(json!({ "error": err.to_string() })),
            );
            None
        }
    }
}
