//! Return address to function name.
//!
//! Lookup goes through `/proc/self/maps` and the on-disk object only; the
//! dynamic loader is never consulted, so this keeps working from exit-time
//! destructors.

use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::elf::ElfFile;
use crate::maps::{MapEntry, find_executable_mapping};

const SELF_MAPS: &str = "/proc/self/maps";

/// What is known about one return address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSymbol {
    /// Path of the object mapped at the address, empty for anonymous code.
    pub object: String,
    /// File offset of the address within `object`.
    pub file_offset: u64,
    /// Demangled function name, when a symbol table covers the address.
    pub name: Option<String>,
}

impl FrameSymbol {
    /// The function name, or `"<object-path>+0x<offset>"` without one.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}+{:#x}", self.object, self.file_offset),
        }
    }
}

/// Best-effort label for `pc` in the current process.
///
/// `None` when no executable mapping holds `pc`.
pub fn symbolize(pc: u64) -> Option<String> {
    resolve(pc).map(|frame| frame.label())
}

/// Like [`symbolize`] but with the mapping table supplied by the caller.
pub fn symbolize_with_maps(maps: impl BufRead, pc: u64) -> Option<String> {
    resolve_with_maps(maps, pc).map(|frame| frame.label())
}

/// Object and symbol for `pc` in the current process.
pub fn resolve(pc: u64) -> Option<FrameSymbol> {
    let maps = File::open(SELF_MAPS).ok()?;
    resolve_with_maps(BufReader::new(maps), pc)
}

pub fn resolve_with_maps(maps: impl BufRead, pc: u64) -> Option<FrameSymbol> {
    let mapping = find_executable_mapping(maps, pc)?;
    Some(FrameSymbol {
        name: symbol_in_mapping(&mapping, pc),
        file_offset: mapping.file_offset_of(pc),
        object: mapping.path,
    })
}

fn symbol_in_mapping(mapping: &MapEntry, pc: u64) -> Option<String> {
    if mapping.path.is_empty() || mapping.path.starts_with('[') {
        return None;
    }
    let elf = ElfFile::open(&mapping.path).ok()?;
    let bias = elf.load_bias(mapping.start, mapping.offset).ok()?;
    let raw = elf.lookup(pc, bias).ok()??;
    Some(demangle(&raw))
}

/// Demangle Rust (legacy and v0) or Itanium C++ names; anything else is
/// returned unchanged.
pub fn demangle(raw: &str) -> String {
    if let Ok(rust) = rustc_demangle::try_demangle(raw) {
        return format!("{rust:#}");
    }
    if let Ok(cpp) = cpp_demangle::Symbol::new(raw.as_bytes()) {
        if let Ok(text) = cpp.demangle(&cpp_demangle::DemangleOptions::default()) {
            return text;
        }
    }
    raw.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn demangles_itanium_names() {
        assert_eq!(demangle("_Z3fooi"), "foo(int)");
        assert_eq!(demangle("_ZN2ns3barEv"), "ns::bar()");
    }

    #[test]
    fn demangles_rust_names_without_hash() {
        assert_eq!(
            demangle("_ZN4core3ptr13drop_in_place17h1234567890abcdefE"),
            "core::ptr::drop_in_place"
        );
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(demangle("main"), "main");
        assert_eq!(demangle("__libc_start_main"), "__libc_start_main");
    }

    #[test]
    fn anonymous_mapping_gets_offset_label() {
        let maps = "7f0000000000-7f0000001000 r-xp 00000000 00:00 0\n";
        let label = symbolize_with_maps(Cursor::new(maps), 0x7f00_0000_0010).unwrap();
        assert_eq!(label, "+0x10");
    }

    #[test]
    fn unreadable_object_gets_path_label() {
        let maps = "1000-3000 r-xp 00004000 08:01 1 /nonexistent/leaktrace/libnone.so\n";
        let label = symbolize_with_maps(Cursor::new(maps), 0x1800).unwrap();
        assert_eq!(label, "/nonexistent/leaktrace/libnone.so+0x4800");
    }

    #[test]
    fn resolved_frame_keeps_object_path() {
        let maps = "1000-3000 r-xp 00000000 08:01 1 /nonexistent/libnone.so\n";
        let frame = resolve_with_maps(Cursor::new(maps), 0x1010).unwrap();
        assert_eq!(frame.object, "/nonexistent/libnone.so");
        assert_eq!(frame.file_offset, 0x10);
        assert!(frame.name.is_none());
    }

    #[test]
    fn unmapped_address_is_not_found() {
        let maps = "1000-3000 r-xp 00000000 08:01 1 /nonexistent/libnone.so\n";
        assert!(symbolize_with_maps(Cursor::new(maps), 0x5000).is_none());
    }
}
