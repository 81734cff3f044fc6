// All extern "C" ABI exports accept raw pointers from C callers and forward
// them to the real allocator unchanged.
#![allow(clippy::missing_safety_doc)]
//! # leaktrace-abi
//!
//! `LD_PRELOAD` interposer for the process allocator.
//!
//! This crate produces a `cdylib` (`libleaktrace.so`) that exports `malloc`,
//! `calloc`, `realloc`, `free`, `cfree`, `memalign`, `aligned_alloc`,
//! `posix_memalign`, `valloc` and `pvalloc`, plus the `leaktrace_start` /
//! `leaktrace_stop` window API. Each allocator entry delegates to the next
//! definition in lookup order and feeds the result to the runtime's session
//! table.
//!
//! # Architecture
//!
//! ```text
//! C caller -> ABI entry (this crate) -> real allocator
//!                                    -> runtime sessions (record / forget)
//! ```
//!
//! A load-time constructor opens the whole-process window and an exit-time
//! destructor reports every window still open.

pub mod capture;
pub mod resolver;
pub mod trace_abi;
pub mod tracking;
pub mod util;

// Gated behind cfg(not(test)) because these modules export #[no_mangle]
// allocator symbols and a load-time constructor that would take over the
// test binary's own heap.
#[cfg(not(test))]
mod lifecycle;
#[cfg(not(test))]
pub mod malloc_abi;
