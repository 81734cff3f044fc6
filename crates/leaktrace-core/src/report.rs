//! Leak report rendering.
//!
//! A report covers one closed tracing window: a header naming where the
//! window was opened and closed, one block per still-live allocation, and a
//! trailing aggregate line.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::time::Instant;

use serde::Serialize;

use crate::registry::{AllocationRecord, AllocationRegistry};
use crate::symbolize::{self, FrameSymbol};

/// Line framing each leak block.
pub const DELIMITER: &str = "----------------------------------------";

/// Source location that opened or closed a tracing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteLabel {
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl SiteLabel {
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            line,
        }
    }

    /// Label opening the implicit whole-process window.
    pub fn process_start() -> Self {
        Self::new("before main()", "main()", 0)
    }

    /// Label closing the implicit whole-process window.
    pub fn process_exit() -> Self {
        Self::new("after main()", "main()", 0)
    }
}

impl fmt::Display for SiteLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {}]", self.file, self.function, self.line)
    }
}

/// Aggregate outcome of one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakSummary {
    pub session: u64,
    pub leaked_bytes: usize,
    pub leaked_allocations: usize,
    pub elapsed_us: u64,
}

impl LeakSummary {
    pub fn is_clean(&self) -> bool {
        self.leaked_bytes == 0
    }
}

/// Source of frame information for the reporter.
pub trait FrameResolver {
    fn resolve(&mut self, pc: usize) -> Option<FrameSymbol>;
}

/// Resolves frames against the live process image.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessResolver;

impl FrameResolver for ProcessResolver {
    fn resolve(&mut self, pc: usize) -> Option<FrameSymbol> {
        symbolize::resolve(pc as u64)
    }
}

/// Resolves nothing; every frame prints as `(null)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl FrameResolver for NullResolver {
    fn resolve(&mut self, _pc: usize) -> Option<FrameSymbol> {
        None
    }
}

/// Memoizes another resolver by frame address for one report.
///
/// Return addresses are looked up one byte back so they land inside the
/// calling instruction rather than at the start of the next function.
#[derive(Debug)]
pub struct SymbolCache<R> {
    inner: R,
    entries: HashMap<usize, Option<FrameSymbol>>,
}

impl<R: FrameResolver> SymbolCache<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            entries: HashMap::new(),
        }
    }

    pub fn lookup(&mut self, frame: usize) -> Option<&FrameSymbol> {
        let inner = &mut self.inner;
        self.entries
            .entry(frame)
            .or_insert_with(|| inner.resolve(frame.saturating_sub(1)))
            .as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Write the report for `registry` to `out`.
pub fn write_report<W: Write, R: FrameResolver>(
    out: &mut W,
    session: u64,
    from: &SiteLabel,
    to: &SiteLabel,
    registry: &AllocationRegistry,
    cache: &mut SymbolCache<R>,
) -> io::Result<LeakSummary> {
    let started = Instant::now();
    writeln!(
        out,
        "leaktrace: session {session} found {} live allocations",
        registry.len()
    )?;
    writeln!(out, "From {from}")?;
    writeln!(out, "To {to}")?;

    let mut leaked_bytes = 0usize;
    for record in registry.iter() {
        write_leak(out, record, cache)?;
        leaked_bytes += record.size;
    }

    if leaked_bytes == 0 {
        writeln!(out, "leaktrace: no memory leak detected")?;
    } else {
        writeln!(
            out,
            "leaktrace: {leaked_bytes} bytes leaked in {} allocations",
            registry.len()
        )?;
    }
    out.flush()?;

    Ok(LeakSummary {
        session,
        leaked_bytes,
        leaked_allocations: registry.len(),
        elapsed_us: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
    })
}

fn write_leak<W: Write, R: FrameResolver>(
    out: &mut W,
    record: &AllocationRecord,
    cache: &mut SymbolCache<R>,
) -> io::Result<()> {
    writeln!(out, "{DELIMITER}")?;
    writeln!(out, "leak memory [{:#x}, {}]", record.address, record.size)?;
    for (index, pc) in record.backtrace.frames().enumerate() {
        match cache.lookup(pc) {
            Some(frame) => {
                let object = if frame.object.is_empty() {
                    "(null)"
                } else {
                    frame.object.as_str()
                };
                writeln!(out, "#{} {pc:#x} {object} {}", index + 1, frame.label())?;
            }
            None => writeln!(out, "#{} {pc:#x} (null) (null)", index + 1)?,
        }
    }
    writeln!(out, "{DELIMITER}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Backtrace;

    /// Pretends every frame below 0x5000 lives in `/bin/app` as `main`.
    struct FakeResolver {
        calls: usize,
    }

    impl FrameResolver for FakeResolver {
        fn resolve(&mut self, pc: usize) -> Option<FrameSymbol> {
            self.calls += 1;
            (pc < 0x5000).then(|| FrameSymbol {
                object: "/bin/app".into(),
                file_offset: pc as u64,
                name: (pc < 0x4000).then(|| "main".to_string()),
            })
        }
    }

    fn render(registry: &AllocationRegistry) -> (String, LeakSummary, usize) {
        let mut cache = SymbolCache::new(FakeResolver { calls: 0 });
        let mut out = Vec::new();
        let summary = write_report(
            &mut out,
            7,
            &SiteLabel::new("a.c", "f", 10),
            &SiteLabel::new("a.c", "f", 20),
            registry,
            &mut cache,
        )
        .unwrap();
        (String::from_utf8(out).unwrap(), summary, cache.inner.calls)
    }

    #[test]
    fn clean_report_has_success_line() {
        let (text, summary, _) = render(&AllocationRegistry::new());
        assert!(summary.is_clean());
        assert_eq!(summary.session, 7);
        assert!(text.contains("From [a.c f 10]"));
        assert!(text.contains("To [a.c f 20]"));
        assert!(text.ends_with("leaktrace: no memory leak detected\n"));
        assert!(!text.contains(DELIMITER));
    }

    #[test]
    fn leak_block_layout() {
        let mut reg = AllocationRegistry::new();
        reg.insert(0x2000, 128, Backtrace::from_frames(&[0x1235, 0x4801, 0x9001]));
        let (text, summary, _) = render(&reg);

        assert_eq!(summary.leaked_bytes, 128);
        assert_eq!(summary.leaked_allocations, 1);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[3], DELIMITER);
        assert_eq!(lines[4], "leak memory [0x2000, 128]");
        assert_eq!(lines[5], "#1 0x1235 /bin/app main");
        assert_eq!(lines[6], "#2 0x4801 /bin/app /bin/app+0x4800");
        assert_eq!(lines[7], "#3 0x9001 (null) (null)");
        assert_eq!(lines[8], DELIMITER);
        assert_eq!(lines[9], "leaktrace: 128 bytes leaked in 1 allocations");
    }

    #[test]
    fn repeated_frames_resolve_once() {
        let mut reg = AllocationRegistry::new();
        let bt = Backtrace::from_frames(&[0x1100, 0x1200]);
        reg.insert(0x2000, 16, bt);
        reg.insert(0x3000, 16, bt);
        reg.insert(0x4000, 16, bt);
        let (_, summary, calls) = render(&reg);
        assert_eq!(summary.leaked_bytes, 48);
        assert_eq!(calls, 2);
    }

    #[test]
    fn site_label_display() {
        assert_eq!(
            SiteLabel::process_start().to_string(),
            "[before main() main() 0]"
        );
        assert_eq!(SiteLabel::process_exit().line, 0);
    }
}
