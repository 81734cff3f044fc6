//! Live-allocation registry.
//!
//! An address-sorted `Vec` searched by binary search. Growth goes through
//! `try_reserve_exact` so running out of memory degrades tracking instead of
//! aborting the traced process.

use serde::Serialize;

/// Return addresses captured per allocation.
pub const BACKTRACE_DEPTH: usize = 10;

/// Minimum number of records added when the registry grows.
pub const GROWTH_CHUNK: usize = 1024;

/// Fixed-size call stack; unused slots hold zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Backtrace {
    frames: [usize; BACKTRACE_DEPTH],
}

impl Backtrace {
    pub const fn empty() -> Self {
        Self {
            frames: [0; BACKTRACE_DEPTH],
        }
    }

    /// Take at most [`BACKTRACE_DEPTH`] frames from `frames`.
    pub fn from_frames(frames: &[usize]) -> Self {
        let mut bt = Self::empty();
        let n = frames.len().min(BACKTRACE_DEPTH);
        bt.frames[..n].copy_from_slice(&frames[..n]);
        bt
    }

    /// Frames up to the first zero.
    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames.iter().copied().take_while(|&pc| pc != 0)
    }

    pub fn raw(&self) -> &[usize; BACKTRACE_DEPTH] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames().count()
    }
}

/// One live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationRecord {
    pub address: usize,
    pub size: usize,
    pub backtrace: Backtrace,
}

/// Address-ordered set of live allocations.
#[derive(Debug, Default)]
pub struct AllocationRegistry {
    records: Vec<AllocationRecord>,
}

impl AllocationRegistry {
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Record a live allocation.
    ///
    /// An address that is already present keeps its existing record. Returns
    /// `None` only when the registry could not grow.
    pub fn insert(
        &mut self,
        address: usize,
        size: usize,
        backtrace: Backtrace,
    ) -> Option<&AllocationRecord> {
        let index = match self.search(address) {
            Ok(found) => return self.records.get(found),
            Err(slot) => slot,
        };
        if self.records.len() == self.records.capacity() {
            let extra = self.records.capacity().max(GROWTH_CHUNK);
            self.records.try_reserve_exact(extra).ok()?;
        }
        self.records.insert(
            index,
            AllocationRecord {
                address,
                size,
                backtrace,
            },
        );
        self.records.get(index)
    }

    /// Forget `address`. Untracked addresses are ignored.
    pub fn remove(&mut self, address: usize) -> Option<AllocationRecord> {
        let index = self.search(address).ok()?;
        Some(self.records.remove(index))
    }

    fn search(&self, address: usize) -> Result<usize, usize> {
        self.records.binary_search_by_key(&address, |r| r.address)
    }

    pub fn contains(&self, address: usize) -> bool {
        self.search(address).is_ok()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AllocationRecord> {
        self.records.get(index)
    }

    /// Records in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.records.iter()
    }

    pub fn total_bytes(&self) -> usize {
        self.records.iter().map(|r| r.size).sum()
    }

    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }
}
