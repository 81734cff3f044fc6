//! Tracing windows and their registries.
//!
//! Every open session owns one [`AllocationRegistry`]. Allocation events fan
//! out to all sessions open at that moment, so nested or overlapping windows
//! each see exactly the allocations made while they were open. One mutex
//! guards the whole table.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;

use leaktrace_core::{AllocationRegistry, Backtrace, SiteLabel};
use parking_lot::Mutex;

/// Identifier handed back by [`SessionManager::start`].
///
/// Ids are never reused within a table, so a stale handle cannot close a
/// newer window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u64);

/// One tracing window.
#[derive(Debug)]
pub struct TraceSession {
    pub id: u64,
    pub opened_at: SiteLabel,
    pub registry: AllocationRegistry,
}

/// A window detached from the table, ready to be reported.
#[derive(Debug)]
pub struct ClosedSession {
    pub id: u64,
    pub opened_at: SiteLabel,
    pub closed_at: SiteLabel,
    pub registry: AllocationRegistry,
}

/// Open sessions in start order. Closed slots are reused.
#[derive(Debug, Default)]
pub struct SessionTable {
    slots: Vec<Option<TraceSession>>,
    next_id: u64,
}

impl SessionTable {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 0,
        }
    }

    fn open(&mut self, opened_at: SiteLabel) -> SessionHandle {
        let id = self.next_id;
        self.next_id += 1;
        let session = TraceSession {
            id,
            opened_at,
            registry: AllocationRegistry::new(),
        };
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(session),
            None => self.slots.push(Some(session)),
        }
        SessionHandle(id)
    }

    fn close(&mut self, handle: SessionHandle) -> Option<TraceSession> {
        self.slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|s| s.id == handle.0))?
            .take()
    }

    fn sessions_mut(&mut self) -> impl Iterator<Item = &mut TraceSession> {
        self.slots.iter_mut().flatten()
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

/// Session table plus its lock.
///
/// The lock sits in an `UnsafeCell` so a forked child can replace it
/// wholesale instead of unlocking state inherited from dead threads.
pub struct SessionManager {
    table: UnsafeCell<Mutex<SessionTable>>,
}

// SAFETY: all access to the table goes through the mutex. The cell is only
// written by `reset_after_fork`, whose contract excludes other threads.
unsafe impl Sync for SessionManager {}

impl SessionManager {
    pub const fn new() -> Self {
        Self {
            table: UnsafeCell::new(parking_lot::const_mutex(SessionTable::new())),
        }
    }

    #[inline]
    fn table(&self) -> &Mutex<SessionTable> {
        // SAFETY: the mutex is only replaced while no reference can be live.
        unsafe { &*self.table.get() }
    }

    /// Open a window.
    pub fn start(&self, opened_at: SiteLabel) -> SessionHandle {
        self.table().lock().open(opened_at)
    }

    /// Detach a window so no further events reach it. Unknown or already
    /// closed handles yield `None`.
    pub fn stop(&self, handle: SessionHandle, closed_at: SiteLabel) -> Option<ClosedSession> {
        let session = self.table().lock().close(handle)?;
        Some(ClosedSession {
            id: session.id,
            opened_at: session.opened_at,
            closed_at,
            registry: session.registry,
        })
    }

    /// Detach every open window, in start order.
    pub fn stop_all(&self, closed_at: &SiteLabel) -> Vec<ClosedSession> {
        let mut table = self.table().lock();
        let mut closed: Vec<ClosedSession> = table
            .slots
            .iter_mut()
            .filter_map(Option::take)
            .map(|session| ClosedSession {
                id: session.id,
                opened_at: session.opened_at,
                closed_at: closed_at.clone(),
                registry: session.registry,
            })
            .collect();
        closed.sort_by_key(|s| s.id);
        closed
    }

    /// Record a successful allocation in every open window. Returns how many
    /// registries now hold it.
    pub fn record_alloc(&self, address: usize, size: usize, backtrace: &Backtrace) -> usize {
        let mut table = self.table().lock();
        table
            .sessions_mut()
            .map(|s| s.registry.insert(address, size, *backtrace).is_some())
            .filter(|&recorded| recorded)
            .count()
    }

    /// Forget `address` in every open window. Returns how many registries
    /// held it.
    pub fn record_free(&self, address: usize) -> usize {
        let mut table = self.table().lock();
        table
            .sessions_mut()
            .map(|s| s.registry.remove(address).is_some())
            .filter(|&removed| removed)
            .count()
    }

    pub fn open_count(&self) -> usize {
        self.table().lock().open_count()
    }

    /// Live allocations tracked by `handle`, if it is open.
    pub fn live_count(&self, handle: SessionHandle) -> Option<usize> {
        let mut table = self.table().lock();
        table
            .sessions_mut()
            .find(|s| s.id == handle.0)
            .map(|s| s.registry.len())
    }

    /// Rebuild state in a freshly forked child.
    ///
    /// Only the forking thread survives `fork`, so the lock may be held by a
    /// thread that no longer exists, and unlocking it can touch
    /// `parking_lot`'s global wait queues which dead threads may also hold.
    /// The inherited mutex is never touched: a new one holding a single
    /// whole-process window is written over it and the old table is leaked.
    ///
    /// # Safety
    ///
    /// No other thread may use this manager during the call, and no guard
    /// from before the call may be used after it. Both hold in a fork child,
    /// where the caller is the only thread.
    pub unsafe fn reset_after_fork(&self) -> SessionHandle {
        let mut fresh = SessionTable::new();
        let handle = fresh.open(SiteLabel::process_start());
        // SAFETY: per the contract nothing else observes the cell; `write`
        // skips dropping the old mutex and its table.
        unsafe { std::ptr::write(self.table.get(), Mutex::new(fresh)) };
        handle
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(line: u32) -> SiteLabel {
        SiteLabel::new("test.rs", "case", line)
    }

    #[test]
    fn events_reach_only_open_sessions() {
        let mgr = SessionManager::new();
        let a = mgr.start(label(1));
        assert_eq!(mgr.record_alloc(0x1000, 8, &Backtrace::empty()), 1);
        let b = mgr.start(label(2));
        assert_eq!(mgr.record_alloc(0x2000, 16, &Backtrace::empty()), 2);

        let closed_b = mgr.stop(b, label(3)).unwrap();
        assert_eq!(closed_b.registry.len(), 1);
        assert!(closed_b.registry.contains(0x2000));

        let closed_a = mgr.stop(a, label(4)).unwrap();
        assert_eq!(closed_a.registry.total_bytes(), 24);
        assert_eq!(closed_a.opened_at.line, 1);
        assert_eq!(closed_a.closed_at.line, 4);
    }

    #[test]
    fn stop_is_one_shot() {
        let mgr = SessionManager::new();
        let h = mgr.start(label(1));
        assert!(mgr.stop(h, label(2)).is_some());
        assert!(mgr.stop(h, label(3)).is_none());
        assert!(mgr.stop(SessionHandle(999), label(4)).is_none());
    }

    #[test]
    fn slots_are_reused_but_ids_are_not() {
        let mgr = SessionManager::new();
        let a = mgr.start(label(1));
        mgr.stop(a, label(2));
        let b = mgr.start(label(3));
        assert_ne!(a, b);
        assert_eq!(mgr.table().lock().slots.len(), 1);
        assert!(mgr.stop(a, label(4)).is_none());
        assert_eq!(mgr.open_count(), 1);
    }

    #[test]
    fn free_without_sessions_is_noop() {
        let mgr = SessionManager::new();
        assert_eq!(mgr.record_free(0x1234), 0);
        assert_eq!(mgr.record_alloc(0x1234, 1, &Backtrace::empty()), 0);
    }

    #[test]
    fn stop_all_returns_start_order() {
        let mgr = SessionManager::new();
        let a = mgr.start(label(1));
        let _b = mgr.start(label(2));
        mgr.stop(a, label(3));
        let _c = mgr.start(label(4));
        let closed = mgr.stop_all(&label(9));
        let ids: Vec<u64> = closed.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(mgr.open_count(), 0);
    }

    #[test]
    fn reset_recovers_a_held_lock() {
        let mgr = SessionManager::new();
        mgr.start(label(1));
        mgr.record_alloc(0x1000, 8, &Backtrace::empty());
        let held = mgr.table().lock();
        // Simulate the lock owner vanishing.
        std::mem::forget(held);
        // SAFETY: single-threaded test; the forgotten guard is never used.
        let h = unsafe { mgr.reset_after_fork() };
        assert_eq!(mgr.open_count(), 1);
        assert_eq!(mgr.live_count(h), Some(0));
        assert_eq!(mgr.record_alloc(0x2000, 8, &Backtrace::empty()), 1);
    }
}
