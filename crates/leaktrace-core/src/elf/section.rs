//! ELF64 section headers.
//!
//! The symbolizer only walks symbol tables and the string tables they link
//! to, so every other section type collapses into [`SectionType::Other`].

use super::{ElfResult, ensure_len, le_u32, le_u64};

const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_DYNSYM: u32 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    /// Full static symbol table, usually stripped from release objects.
    Symtab,
    Strtab,
    /// Exported symbols kept for the dynamic linker.
    Dynsym,
    Other(u32),
}

impl From<u32> for SectionType {
    fn from(value: u32) -> Self {
        match value {
            SHT_SYMTAB => Self::Symtab,
            SHT_STRTAB => Self::Strtab,
            SHT_DYNSYM => Self::Dynsym,
            other => Self::Other(other),
        }
    }
}

/// Location and shape of one section; names, flags and addresses are not
/// needed for lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64SectionHeader {
    pub sh_type: SectionType,
    pub sh_offset: u64,
    pub sh_size: u64,
    /// For symbol tables, index of the string table holding the names.
    pub sh_link: u32,
    pub sh_entsize: u64,
}

impl Elf64SectionHeader {
    /// Size of an ELF64 section header in bytes.
    pub const SIZE: usize = 64;

    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        ensure_len(data, Self::SIZE)?;
        Ok(Self {
            sh_type: SectionType::from(le_u32(data, 4)),
            sh_offset: le_u64(data, 24),
            sh_size: le_u64(data, 32),
            sh_link: le_u32(data, 40),
            sh_entsize: le_u64(data, 56),
        })
    }

    pub fn is_symtab(&self) -> bool {
        matches!(self.sh_type, SectionType::Symtab | SectionType::Dynsym)
    }

    /// Number of fixed-size entries; zero when `sh_entsize` is unset.
    pub fn entry_count(&self) -> u64 {
        self.sh_size.checked_div(self.sh_entsize).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_header(sh_type: u32, offset: u64, size: u64, link: u32, entsize: u64) -> [u8; 64] {
        let mut raw = [0u8; 64];
        raw[4..8].copy_from_slice(&sh_type.to_le_bytes());
        raw[24..32].copy_from_slice(&offset.to_le_bytes());
        raw[32..40].copy_from_slice(&size.to_le_bytes());
        raw[40..44].copy_from_slice(&link.to_le_bytes());
        raw[56..64].copy_from_slice(&entsize.to_le_bytes());
        raw
    }

    #[test]
    fn symbol_table_header() {
        let sh = Elf64SectionHeader::parse(&raw_header(SHT_SYMTAB, 0x40, 72, 5, 24)).unwrap();
        assert!(sh.is_symtab());
        assert_eq!(sh.sh_offset, 0x40);
        assert_eq!(sh.sh_link, 5);
        assert_eq!(sh.entry_count(), 3);
    }

    #[test]
    fn uninteresting_types_are_other() {
        assert_eq!(SectionType::from(SHT_DYNSYM), SectionType::Dynsym);
        assert_eq!(SectionType::from(SHT_STRTAB), SectionType::Strtab);
        assert_eq!(SectionType::from(0x6fff_fff6), SectionType::Other(0x6fff_fff6));
        let sh = Elf64SectionHeader::parse(&raw_header(1, 0, 16, 0, 0)).unwrap();
        assert!(!sh.is_symtab());
    }

    #[test]
    fn zero_entry_size_has_no_entries() {
        let sh = Elf64SectionHeader::parse(&raw_header(SHT_DYNSYM, 0, 0x80, 0, 0)).unwrap();
        assert_eq!(sh.entry_count(), 0);
    }
}
