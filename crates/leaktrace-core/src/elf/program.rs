//! ELF64 program header parsing.
//!
//! `PT_LOAD` segments relate file offsets to link-time virtual addresses,
//! which is what turns a mapping's start address into a load bias.

use super::{ElfResult, ensure_len, le_u32, le_u64};

const PT_LOAD: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    Load,
    Other(u32),
}

impl From<u32> for ProgramType {
    fn from(value: u32) -> Self {
        if value == PT_LOAD {
            Self::Load
        } else {
            Self::Other(value)
        }
    }
}

/// Execute permission bit in `p_flags`.
pub const PF_X: u32 = 0x1;

/// Segment placement: where its bytes sit in the file and the address they
/// were linked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64ProgramHeader {
    pub p_type: ProgramType,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
    /// Page granularity the segment was laid out for.
    pub p_align: u64,
}

impl Elf64ProgramHeader {
    /// Size of an ELF64 program header in bytes.
    pub const SIZE: usize = 56;

    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        ensure_len(data, Self::SIZE)?;
        // p_paddr and p_memsz are not needed.
        Ok(Self {
            p_type: ProgramType::from(le_u32(data, 0)),
            p_flags: le_u32(data, 4),
            p_offset: le_u64(data, 8),
            p_vaddr: le_u64(data, 16),
            p_filesz: le_u64(data, 32),
            p_align: le_u64(data, 48),
        })
    }

    pub fn is_load(&self) -> bool {
        self.p_type == ProgramType::Load
    }

    pub fn is_executable(&self) -> bool {
        self.p_flags & PF_X != 0
    }

    /// Whether the page-aligned file offset `map_offset` lies in this segment.
    ///
    /// The kernel maps segments starting at page boundaries, so the mapping's
    /// offset can sit slightly below `p_offset`.
    pub fn contains_file_offset(&self, map_offset: u64, page_size: u64) -> bool {
        let mask = if page_size.is_power_of_two() {
            !(page_size - 1)
        } else {
            u64::MAX
        };
        let aligned = self.p_offset & mask;
        aligned <= map_offset && map_offset < self.p_offset.saturating_add(self.p_filesz)
    }

    /// Load bias for a mapping of this segment that starts at `map_start`
    /// with file offset `map_offset`.
    pub fn load_bias(&self, map_start: u64, map_offset: u64) -> u64 {
        // file offset `map_offset` corresponds to link-time address
        // p_vaddr + (map_offset - p_offset)
        let linked = self
            .p_vaddr
            .wrapping_add(map_offset)
            .wrapping_sub(self.p_offset);
        map_start.wrapping_sub(linked)
    }
}
