//! # leaktrace-core
//!
//! Safe building blocks for the leaktrace allocator tracer.
//!
//! Nothing in this crate touches process-global state or installs hooks:
//! the registry is a plain value, the symbolizer reads files, and the
//! reporter writes to any `io::Write`. The runtime and ABI crates own the
//! process-wide wiring.

#![deny(unsafe_code)]

pub mod elf;
pub mod maps;
pub mod registry;
pub mod report;
pub mod symbolize;

pub use registry::{AllocationRecord, AllocationRegistry, BACKTRACE_DEPTH, Backtrace};
pub use report::{
    FrameResolver, LeakSummary, NullResolver, ProcessResolver, SiteLabel, SymbolCache,
    write_report,
};
pub use symbolize::{FrameSymbol, symbolize};
