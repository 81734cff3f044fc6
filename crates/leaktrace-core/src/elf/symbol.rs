//! ELF64 symbol table entries.
//!
//! Only the fields needed to test whether an address falls inside a defined
//! symbol are decoded; binding, type and visibility are ignored.

use super::{ElfResult, ensure_len, le_u16, le_u32, le_u64};

/// Undefined symbol section index.
pub const SHN_UNDEF: u16 = 0;

/// The parts of an ELF64 symbol table entry the symbolizer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Symbol {
    /// Offset of the name in the linked string table.
    pub st_name: u32,
    /// Defining section, or [`SHN_UNDEF`].
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Elf64Symbol {
    /// Size of an ELF64 symbol entry in bytes.
    pub const SIZE: usize = 24;

    /// Decode one entry; `st_info` and `st_other` (bytes 4 and 5) are skipped.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        ensure_len(data, Self::SIZE)?;

        Ok(Self {
            st_name: le_u32(data, 0),
            st_shndx: le_u16(data, 6),
            st_value: le_u64(data, 8),
            st_size: le_u64(data, 16),
        })
    }

    /// Imported rather than defined here.
    pub fn is_undefined(&self) -> bool {
        self.st_shndx == SHN_UNDEF
    }

    /// Whether `addr` falls inside `[value + bias, value + bias + size)`.
    ///
    /// Symbols with a zero value or no defining section never match.
    pub fn covers(&self, addr: u64, bias: u64) -> bool {
        if self.st_value == 0 || self.is_undefined() {
            return false;
        }
        let start = self.st_value.wrapping_add(bias);
        let end = start.wrapping_add(self.st_size);
        start <= addr && addr < end
    }
}

/// Read a NUL-terminated name out of a string-table window.
///
/// Returns `None` when no terminator is found inside `window`, which means
/// the name was longer than the caller's bound.
pub fn name_from_window(window: &[u8]) -> Option<&str> {
    let end = window.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&window[..end]).ok()
}
