//! How a completed allocator call changes the tracked set.
//!
//! The entry points in `malloc_abi` only see raw results from the real
//! allocator; the decisions about what to record or forget live here so they
//! can be checked without interposing anything.

/// What a finished `realloc(old, size)` that returned `new` means for the
/// windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReallocEffect {
    /// Nothing to do: failed in place, or resized without moving.
    Keep,
    /// `realloc(NULL, size)` behaved like `malloc`.
    Record,
    /// Zero-size request released the block.
    Forget,
    /// Block moved: forget `old`, record `new`.
    Move,
}

pub fn realloc_effect(old: usize, new: usize, size: usize) -> ReallocEffect {
    match (old, new) {
        (0, 0) => ReallocEffect::Keep,
        (0, _) => ReallocEffect::Record,
        // Any failure other than a zero-size release leaves the old block.
        (_, 0) if size == 0 => ReallocEffect::Forget,
        (_, 0) => ReallocEffect::Keep,
        _ if new == old => ReallocEffect::Keep,
        _ => ReallocEffect::Move,
    }
}

/// Whether a `free` of `ptr` reaches the real allocator. Null and
/// bootstrap-arena blocks are dropped.
pub fn releases(ptr: usize, in_arena: bool) -> bool {
    ptr != 0 && !in_arena
}

/// Size `pvalloc` hands out: `size` rounded up to whole pages, one page for
/// zero. `None` on overflow.
pub fn page_rounded(size: usize, page_size: usize) -> Option<usize> {
    if size == 0 {
        Some(page_size)
    } else {
        size.checked_next_multiple_of(page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realloc_of_null_is_an_allocation() {
        assert_eq!(realloc_effect(0, 0x5000, 48), ReallocEffect::Record);
        assert_eq!(realloc_effect(0, 0, 48), ReallocEffect::Keep);
    }

    #[test]
    fn zero_size_realloc_releases() {
        assert_eq!(realloc_effect(0x5000, 0, 0), ReallocEffect::Forget);
    }

    #[test]
    fn failed_realloc_keeps_the_old_record() {
        assert_eq!(realloc_effect(0x5000, 0, 1 << 40), ReallocEffect::Keep);
    }

    #[test]
    fn address_stable_and_moving_realloc() {
        assert_eq!(realloc_effect(0x5000, 0x5000, 256), ReallocEffect::Keep);
        assert_eq!(realloc_effect(0x5000, 0x9000, 256), ReallocEffect::Move);
    }

    #[test]
    fn arena_and_null_frees_are_dropped() {
        assert!(!releases(0, false));
        assert!(!releases(0x1000, true));
        assert!(releases(0x1000, false));
    }

    #[test]
    fn pvalloc_rounds_to_pages() {
        assert_eq!(page_rounded(0, 4096), Some(4096));
        assert_eq!(page_rounded(1, 4096), Some(4096));
        assert_eq!(page_rounded(4097, 4096), Some(8192));
        assert_eq!(page_rounded(usize::MAX, 4096), None);
    }
}
