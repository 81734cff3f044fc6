//! Positioned reads over an on-disk ELF object.
//!
//! Tables are never loaded whole. Section headers are scanned in batches of
//! [`SECTION_BATCH`], symbols in batches of [`SYMBOL_BATCH`], and symbol names
//! are read into a window of at most [`MAX_SYMBOL_NAME`] bytes.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::{
    Elf64Header, Elf64ProgramHeader, Elf64SectionHeader, Elf64Symbol, ElfError, ElfResult,
    SectionType, symbol::name_from_window,
};

/// Section headers read per positioned read.
pub const SECTION_BATCH: usize = 16;

/// Symbols read per positioned read.
pub const SYMBOL_BATCH: usize = 32;

/// Longest symbol name (including the terminator) that will be returned.
pub const MAX_SYMBOL_NAME: usize = 1024;

/// An open ELF64 object with its parsed file header.
#[derive(Debug)]
pub struct ElfFile {
    file: File,
    header: Elf64Header,
}

impl ElfFile {
    /// Open `path` and validate its ELF header.
    pub fn open(path: impl AsRef<Path>) -> ElfResult<Self> {
        Self::from_file(File::open(path)?)
    }

    /// Wrap an already open file.
    pub fn from_file(file: File) -> ElfResult<Self> {
        let mut raw = [0u8; Elf64Header::SIZE];
        file.read_exact_at(&mut raw, 0)?;
        let header = Elf64Header::parse(&raw)?;
        Ok(Self { file, header })
    }

    pub fn header(&self) -> &Elf64Header {
        &self.header
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> ElfResult<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Read the section header at `index`.
    pub fn section_at(&self, index: u32) -> ElfResult<Elf64SectionHeader> {
        if index >= u32::from(self.header.e_shnum) {
            return Err(ElfError::InvalidSectionIndex(index));
        }
        self.check_section_entry_size()?;
        let offset = entry_offset(
            self.header.e_shoff,
            index as usize,
            Elf64SectionHeader::SIZE,
            "section header",
        )?;
        let mut raw = [0u8; Elf64SectionHeader::SIZE];
        self.read_exact_at(&mut raw, offset)?;
        Elf64SectionHeader::parse(&raw)
    }

    /// First section header of type `wanted`, if any.
    pub fn section_by_type(&self, wanted: SectionType) -> ElfResult<Option<Elf64SectionHeader>> {
        let count = usize::from(self.header.e_shnum);
        if count == 0 {
            return Ok(None);
        }
        self.check_section_entry_size()?;

        let mut buf = [0u8; SECTION_BATCH * Elf64SectionHeader::SIZE];
        let mut index = 0usize;
        while index < count {
            let batch = (count - index).min(SECTION_BATCH);
            let bytes = batch * Elf64SectionHeader::SIZE;
            let offset = entry_offset(
                self.header.e_shoff,
                index,
                Elf64SectionHeader::SIZE,
                "section header",
            )?;
            self.read_exact_at(&mut buf[..bytes], offset)?;
            for chunk in buf[..bytes].chunks_exact(Elf64SectionHeader::SIZE) {
                let section = Elf64SectionHeader::parse(chunk)?;
                if section.sh_type == wanted {
                    return Ok(Some(section));
                }
            }
            index += batch;
        }
        Ok(None)
    }

    fn check_section_entry_size(&self) -> ElfResult<()> {
        let size = usize::from(self.header.e_shentsize);
        if size != Elf64SectionHeader::SIZE {
            return Err(ElfError::UnexpectedEntrySize {
                kind: "section header",
                size: size as u64,
            });
        }
        Ok(())
    }

    /// Read every program header.
    pub fn program_headers(&self) -> ElfResult<Vec<Elf64ProgramHeader>> {
        let count = usize::from(self.header.e_phnum);
        if count == 0 {
            return Ok(Vec::new());
        }
        let size = usize::from(self.header.e_phentsize);
        if size != Elf64ProgramHeader::SIZE {
            return Err(ElfError::UnexpectedEntrySize {
                kind: "program header",
                size: size as u64,
            });
        }
        let mut raw = vec![0u8; count * Elf64ProgramHeader::SIZE];
        self.read_exact_at(&mut raw, self.header.e_phoff)?;
        raw.chunks_exact(Elf64ProgramHeader::SIZE)
            .map(Elf64ProgramHeader::parse)
            .collect()
    }

    /// Difference between runtime and link-time addresses for a mapping of
    /// this object at `map_start` with file offset `map_offset`.
    ///
    /// Fixed-address executables have no bias. For relocatable objects the
    /// executable `PT_LOAD` covering `map_offset` decides; without one the
    /// mapping is assumed to be laid out like the file.
    pub fn load_bias(&self, map_start: u64, map_offset: u64) -> ElfResult<u64> {
        if self.header.is_executable() {
            return Ok(0);
        }
        let fallback = map_start.wrapping_sub(map_offset);
        let headers = match self.program_headers() {
            Ok(headers) => headers,
            Err(ElfError::UnexpectedEntrySize { .. }) => return Ok(fallback),
            Err(err) => return Err(err),
        };
        Ok(headers
            .iter()
            .filter(|ph| ph.is_load() && ph.is_executable())
            .find(|ph| ph.contains_file_offset(map_offset, ph.p_align))
            .map_or(fallback, |ph| ph.load_bias(map_start, map_offset)))
    }

    /// Name of the symbol in `table` whose extent covers `pc` once shifted by
    /// `bias`.
    ///
    /// `Ok(None)` means no defined symbol matched, or the matching name did
    /// not fit in [`MAX_SYMBOL_NAME`] bytes.
    pub fn find_symbol(
        &self,
        pc: u64,
        bias: u64,
        table: &Elf64SectionHeader,
    ) -> ElfResult<Option<String>> {
        if table.sh_entsize != Elf64Symbol::SIZE as u64 {
            return Err(ElfError::UnexpectedEntrySize {
                kind: "symbol",
                size: table.sh_entsize,
            });
        }
        let count = table.entry_count() as usize;
        let mut buf = [0u8; SYMBOL_BATCH * Elf64Symbol::SIZE];
        let mut index = 0usize;
        while index < count {
            let batch = (count - index).min(SYMBOL_BATCH);
            let bytes = batch * Elf64Symbol::SIZE;
            let offset = entry_offset(table.sh_offset, index, Elf64Symbol::SIZE, "symbol")?;
            self.read_exact_at(&mut buf[..bytes], offset)?;
            for chunk in buf[..bytes].chunks_exact(Elf64Symbol::SIZE) {
                let symbol = Elf64Symbol::parse(chunk)?;
                if symbol.covers(pc, bias) {
                    let strtab = self.section_at(table.sh_link)?;
                    return self.read_name(&strtab, symbol.st_name);
                }
            }
            index += batch;
        }
        Ok(None)
    }

    fn read_name(&self, strtab: &Elf64SectionHeader, name: u32) -> ElfResult<Option<String>> {
        let name_offset = u64::from(name);
        if name_offset >= strtab.sh_size {
            return Err(ElfError::InvalidStringIndex(name));
        }
        let available = (strtab.sh_size - name_offset).min(MAX_SYMBOL_NAME as u64) as usize;
        let mut window = [0u8; MAX_SYMBOL_NAME];
        let offset = strtab
            .sh_offset
            .checked_add(name_offset)
            .ok_or(ElfError::InvalidOffset {
                kind: "string table",
                offset: strtab.sh_offset,
            })?;
        self.read_exact_at(&mut window[..available], offset)?;
        Ok(name_from_window(&window[..available]).map(str::to_owned))
    }

    /// Look `pc` up in the full symbol table, then in the dynamic one.
    ///
    /// A table that cannot be read counts as having no match, so a damaged
    /// `.symtab` still leaves `.dynsym` to try. The first such error is
    /// returned only when neither table names `pc`.
    pub fn lookup(&self, pc: u64, bias: u64) -> ElfResult<Option<String>> {
        let mut first_err = None;
        for kind in [SectionType::Symtab, SectionType::Dynsym] {
            let found = self
                .section_by_type(kind)
                .and_then(|table| match table {
                    Some(table) => self.find_symbol(pc, bias, &table),
                    None => Ok(None),
                });
            match found {
                Ok(Some(name)) => return Ok(Some(name)),
                Ok(None) => {}
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        first_err.map_or(Ok(None), Err)
    }
}

/// `base + index * entry_size`, or [`ElfError::InvalidOffset`] on overflow.
fn entry_offset(base: u64, index: usize, entry_size: usize, kind: &'static str) -> ElfResult<u64> {
    (index as u64)
        .checked_mul(entry_size as u64)
        .and_then(|delta| base.checked_add(delta))
        .ok_or(ElfError::InvalidOffset { kind, offset: base })
}
